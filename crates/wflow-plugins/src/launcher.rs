//! Turning a plugin directory into a connected [`PluginClient`].
//!
//! [`PluginLauncher`] is the seam the manager uses so tests can replace real
//! processes. [`ProcessLauncher`] spawns the executable, dials the announced
//! address, serves the host callbacks on a broker channel, and asks the
//! plugin to dispense its service.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use wflow_plugin_protocol::handshake::PLUGIN_SERVICE_NAME;
use wflow_plugin_protocol::{
    Announcement, Broker, Connection, HandshakeConfig, PRIMARY_CHANNEL, Role, Stream,
};

use crate::callback::{CallbackHooks, CallbackServer, CallbackService};
use crate::client::PluginClient;
use crate::discovery::PluginDirectoryEntry;
use crate::error::PluginError;
use crate::manifest::PluginManifest;
use crate::process::{SpawnedPlugin, reap, spawn_plugin};
use crate::stub::{PluginService, RpcPluginService};

const LAUNCHER_TARGET: &str = "wflow_plugins::launcher";

/// Default time allowed for a plugin to announce itself.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for dialling the announced address.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts plugins.
pub trait PluginLauncher: Send + Sync {
    /// Starts the plugin in `entry` described by `manifest`.
    ///
    /// # Errors
    ///
    /// Returns a process or transport error when the plugin cannot be
    /// brought up. Nothing is left running on failure.
    fn launch(
        &self,
        entry: &PluginDirectoryEntry,
        manifest: &PluginManifest,
    ) -> Result<PluginClient, PluginError>;
}

/// Launches plugins as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    handshake: HandshakeConfig,
    start_timeout: Duration,
    connect_timeout: Duration,
    hooks: CallbackHooks,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(HandshakeConfig::default())
    }
}

impl ProcessLauncher {
    /// Creates a launcher using `handshake`.
    #[must_use]
    pub fn new(handshake: HandshakeConfig) -> Self {
        Self {
            handshake,
            start_timeout: DEFAULT_START_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            hooks: CallbackHooks::default(),
        }
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the host hooks every plugin's callback server uses.
    #[must_use]
    pub fn with_hooks(mut self, hooks: CallbackHooks) -> Self {
        self.hooks = hooks;
        self
    }

    fn connect(
        &self,
        entry: &PluginDirectoryEntry,
        announcement: &Announcement,
    ) -> Result<PluginClient, PluginError> {
        let name = entry.name();
        let stream = Stream::connect(
            announcement.network,
            &announcement.address,
            self.connect_timeout,
        )
        .map_err(|source| PluginError::Connect {
            name: name.to_owned(),
            address: announcement.address.clone(),
            source: Arc::new(source),
        })?;
        let connection =
            Connection::start(stream, Role::Host, name).map_err(|err| PluginError::io(name, err))?;

        let broker = Broker::new(connection.clone());
        let callback_channel = broker.next_id();
        let callbacks = Arc::new(CallbackServer::new(name, self.hooks.clone()));
        let rpc = Arc::new(RpcPluginService::new(connection.channel(PRIMARY_CHANNEL)));
        let stub: Arc<dyn PluginService> = rpc.clone();
        callbacks.attach_plugin(&stub);
        broker.accept_and_serve(
            callback_channel,
            Arc::new(CallbackService::new(Arc::clone(&callbacks))),
        );

        let dispensed = rpc
            .dispense(
                PLUGIN_SERVICE_NAME,
                self.handshake.app_version(),
                callback_channel,
            )
            .map_err(|source| PluginError::transport("Connect", None, source))
            .and_then(|reply| {
                if reply.service == PLUGIN_SERVICE_NAME {
                    Ok(reply)
                } else {
                    Err(PluginError::DispenseMismatch {
                        name: name.to_owned(),
                        expected: PLUGIN_SERVICE_NAME.to_owned(),
                        actual: reply.service,
                    })
                }
            });
        if let Err(error) = dispensed {
            connection.close();
            return Err(error);
        }

        Ok(PluginClient::new(name, entry.directory(), stub)
            .with_connection(connection)
            .with_callbacks(callbacks))
    }
}

impl PluginLauncher for ProcessLauncher {
    fn launch(
        &self,
        entry: &PluginDirectoryEntry,
        manifest: &PluginManifest,
    ) -> Result<PluginClient, PluginError> {
        let SpawnedPlugin {
            mut child,
            announcement,
        } = spawn_plugin(
            entry.name(),
            entry.executable_path(),
            entry.directory(),
            &self.handshake,
            self.start_timeout,
        )?;
        match self.connect(entry, &announcement) {
            Ok(client) => {
                info!(
                    target: LAUNCHER_TARGET,
                    plugin = entry.name(),
                    version = manifest.version(),
                    pid = child.id(),
                    address = %announcement.address,
                    "plugin connected"
                );
                Ok(client.with_process(Box::new(child)))
            }
            Err(error) => {
                reap(&mut child);
                Err(error)
            }
        }
    }
}
