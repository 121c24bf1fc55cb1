//! Structured telemetry for the daemon and the plugins it hosts.
//!
//! Plugins log through the host callback service; those records are emitted
//! under [`PLUGIN_LOG_TARGET`] with the plugin name as a field. Unless the
//! configured filter names that target itself, plugin records at `info` and
//! above are kept even when the daemon's own filter is quieter, so a daemon
//! running at `warn` still shows what its plugins report.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;

use wflow_config::{Config, LogFormat};
use wflow_plugins::PLUGIN_LOG_TARGET;

const TELEMETRY_TARGET: &str = "wflowd::telemetry";

/// Minimum level for plugin log records when the filter does not say.
const PLUGIN_LOG_LEVEL: &str = "info";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the
/// global state, so tests and the binary can both call it.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already set.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

/// Builds the event filter: the configured directives plus a floor for
/// plugin log records.
fn daemon_filter(configured: &str) -> Result<EnvFilter, TelemetryError> {
    let filter =
        EnvFilter::try_new(configured).map_err(|error| TelemetryError::Filter(error.to_string()))?;
    if configured.contains(PLUGIN_LOG_TARGET) {
        return Ok(filter);
    }
    let plugin_logs = format!("{PLUGIN_LOG_TARGET}={PLUGIN_LOG_LEVEL}")
        .parse::<Directive>()
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    Ok(filter.add_directive(plugin_logs))
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = daemon_filter(config.log_filter())?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    tracing::debug!(
        target: TELEMETRY_TARGET,
        filter = config.log_filter(),
        format = %config.log_format(),
        plugin_target = PLUGIN_LOG_TARGET,
        "telemetry initialised"
    );
    Ok(())
}
