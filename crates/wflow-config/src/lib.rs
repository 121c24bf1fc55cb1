//! Configuration for the wflow plugin host daemon.
//!
//! Values are layered, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`--config-path`, or `wflow.toml` in the working directory
//!    when present),
//! 3. `WFLOW_*` environment variables, with `__` separating nested keys
//!    (`WFLOW_HANDSHAKE__START_TIMEOUT_SECS`),
//! 4. command-line flags.

mod cli;
mod defaults;
mod logging;

use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cli::CliArgs;
pub use defaults::{
    DEFAULT_CONFIG_FILE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LISTEN, DEFAULT_LOG_FILTER,
    DEFAULT_PLUGINS_DIR, DEFAULT_START_TIMEOUT_SECS, ENV_PREFIX,
};
pub use logging::LogFormat;

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command-line parsing failed, or help or version output was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// A configuration layer could not be read or deserialised.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Timeouts applied while starting a plugin process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    start_timeout_secs: u64,
    connect_timeout_secs: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            start_timeout_secs: DEFAULT_START_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl HandshakeSettings {
    /// Time a plugin has to print its handshake line.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Time allowed for dialling the announced address.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    plugins_dir: Utf8PathBuf,
    listen: String,
    log_filter: String,
    log_format: LogFormat,
    handshake: HandshakeSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: defaults::plugins_dir(),
            listen: defaults::listen(),
            log_filter: defaults::log_filter(),
            log_format: defaults::log_format(),
            handshake: HandshakeSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any layer fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration from explicit arguments and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any layer fails.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args)?;
        Self::from_layers(&cli, None)
    }

    /// Loads configuration from explicit arguments and an explicit
    /// environment map instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any layer fails.
    pub fn load_with_environment<I, T>(
        args: I,
        environment: HashMap<String, String>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args)?;
        Self::from_layers(&cli, Some(environment))
    }

    fn from_layers(
        cli: &CliArgs,
        environment: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = match &cli.config_path {
            Some(path) => builder.add_source(config::File::from(path.as_std_path()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let env_source = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(environment.map(|map| map.into_iter().collect()));

        let settings = builder
            .add_source(env_source)
            .set_override_option(
                "plugins_dir",
                cli.plugins_dir.as_ref().map(ToString::to_string),
            )?
            .set_override_option("listen", cli.listen.clone())?
            .set_override_option("log_filter", cli.log_filter.clone())?
            .set_override_option(
                "log_format",
                cli.log_format.map(|format| format.to_string()),
            )?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Directory containing plugin subdirectories.
    #[must_use]
    pub fn plugins_dir(&self) -> &Utf8Path {
        &self.plugins_dir
    }

    /// Address of the management HTTP API.
    #[must_use]
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Plugin start-up timeouts.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeSettings {
        &self.handshake
    }

    /// Replaces the plugins directory.
    #[must_use]
    pub fn with_plugins_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.plugins_dir = dir.into();
        self
    }
}
