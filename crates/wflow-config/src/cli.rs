use camino::Utf8PathBuf;
use clap::Parser;

use crate::logging::LogFormat;

/// Command-line flags accepted by the daemon. Flags override every other
/// configuration layer.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "wflowd", about = "Workflow engine plugin host", version)]
pub struct CliArgs {
    /// Explicit configuration file. Must exist when given.
    #[arg(long = "config-path", value_name = "PATH")]
    pub config_path: Option<Utf8PathBuf>,
    /// Directory containing plugin subdirectories.
    #[arg(long = "plugins-dir", value_name = "DIR")]
    pub plugins_dir: Option<Utf8PathBuf>,
    /// Address of the management HTTP API.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
    /// Tracing filter expression, for example `info,wflow_plugins=debug`.
    #[arg(long = "log-filter", value_name = "FILTER")]
    pub log_filter: Option<String>,
    /// Log output format.
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}
