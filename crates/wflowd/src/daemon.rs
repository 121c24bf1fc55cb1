//! Daemon assembly and the management serve loop.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::{info, warn};

use wflow_config::Config;
use wflow_plugins::{PluginManager, ProcessLauncher};

use crate::api;
use crate::broker::MessageBroker;
use crate::telemetry::{self, TelemetryError};

const DAEMON_TARGET: &str = "wflowd::daemon";

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The async runtime could not be built.
    #[error("failed to start the async runtime: {source}")]
    Runtime {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The management listener could not be bound.
    #[error("failed to listen on {address}: {source}")]
    Bind {
        /// Configured listen address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The management server stopped with an error.
    #[error("management server failed: {source}")]
    Serve {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A configured plugin host.
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    manager: Arc<PluginManager>,
    broker: Arc<MessageBroker>,
}

impl Daemon {
    /// Wires the broker, launcher and manager for `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let broker = MessageBroker::new();
        let launcher = ProcessLauncher::default()
            .with_start_timeout(config.handshake().start_timeout())
            .with_connect_timeout(config.handshake().connect_timeout())
            .with_hooks(broker.hooks());
        let manager = Arc::new(PluginManager::new(
            config.plugins_dir().as_std_path(),
            Arc::new(launcher),
        ));
        Self {
            config,
            manager,
            broker,
        }
    }

    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The plugin manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// The message broker plugins publish to.
    #[must_use]
    pub const fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Management router bound to this daemon's manager.
    #[must_use]
    pub fn router(&self) -> Router {
        api::router(Arc::clone(&self.manager))
    }

    /// Serves the management API until `shutdown` resolves, then stops
    /// every plugin.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Bind`] when the listener cannot be bound and
    /// [`DaemonError::Serve`] when the server fails.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), DaemonError> {
        let address = self.config.listen().to_owned();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|source| DaemonError::Bind {
                address: address.clone(),
                source,
            })?;
        info!(
            target: DAEMON_TARGET,
            address = %address,
            plugins_dir = %self.config.plugins_dir(),
            "management API listening"
        );

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        let manager = Arc::clone(&self.manager);
        if let Err(error) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
            warn!(target: DAEMON_TARGET, %error, "plugin shutdown task failed");
        }
        served.map_err(|source| DaemonError::Serve { source })
    }
}

/// Initialises telemetry and runs the daemon until interrupted.
///
/// # Errors
///
/// Returns a [`DaemonError`] describing the first fatal failure.
pub fn run(config: Config) -> Result<(), DaemonError> {
    telemetry::initialise(&config).map_err(|source| DaemonError::Telemetry { source })?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| DaemonError::Runtime { source })?;
    runtime.block_on(Daemon::new(config).serve(shutdown_signal()))
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(target: DAEMON_TARGET, %error, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(target: DAEMON_TARGET, %error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    info!(target: DAEMON_TARGET, "shutdown requested");
}
