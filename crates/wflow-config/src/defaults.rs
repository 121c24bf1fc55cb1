use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Directory scanned for plugins when nothing else is configured.
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Address the management API binds to by default.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8081";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds a plugin has to print its handshake line.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 10;

/// Seconds allowed for dialling the announced address.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "WFLOW";

/// Configuration file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "wflow.toml";

pub(crate) fn plugins_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_PLUGINS_DIR)
}

pub(crate) fn listen() -> String {
    DEFAULT_LISTEN.to_owned()
}

pub(crate) fn log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

pub(crate) const fn log_format() -> LogFormat {
    LogFormat::Json
}
