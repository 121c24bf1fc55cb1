//! A connected plugin: its service stub plus the resources to tear it down.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use wflow_plugin_protocol::Connection;

use crate::callback::CallbackServer;
use crate::stub::PluginService;

const CLIENT_TARGET: &str = "wflow_plugins::client";

/// The operating-system process behind a plugin.
pub trait ProcessHandle: Send {
    /// Process id, when known.
    fn id(&self) -> Option<u32>;
    /// Kills the process and reaps it.
    fn terminate(&mut self);
}

impl ProcessHandle for Child {
    fn id(&self) -> Option<u32> {
        Some(Child::id(self))
    }

    fn terminate(&mut self) {
        crate::process::reap(self);
    }
}

/// Host-side handle to one running plugin.
///
/// Dropping the client kills the plugin. [`PluginClient::kill`] does the same
/// eagerly and is idempotent.
pub struct PluginClient {
    name: String,
    directory: PathBuf,
    stub: Arc<dyn PluginService>,
    connection: Option<Connection>,
    callbacks: Option<Arc<CallbackServer>>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    /// Creates a client around `stub`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        stub: Arc<dyn PluginService>,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            stub,
            connection: None,
            callbacks: None,
            process: Mutex::new(None),
        }
    }

    /// Attaches the connection closed on kill.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Attaches the callback server whose subscriptions are cancelled on kill.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Arc<CallbackServer>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Attaches the process terminated on kill.
    #[must_use]
    pub fn with_process(self, process: Box<dyn ProcessHandle>) -> Self {
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(process);
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory the plugin was loaded from.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Shared service stub.
    #[must_use]
    pub fn stub(&self) -> Arc<dyn PluginService> {
        Arc::clone(&self.stub)
    }

    /// Process id while the plugin is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|process| process.id())
    }

    /// Stops the plugin.
    ///
    /// Subscriptions are cancelled, the connection is closed so outstanding
    /// calls fail with a transport error, and the process is killed without
    /// waiting for in-flight work.
    pub fn kill(&self) {
        if let Some(callbacks) = &self.callbacks {
            callbacks.cancel_all();
        }
        if let Some(connection) = &self.connection {
            connection.close();
        }
        let process = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut process) = process {
            debug!(target: CLIENT_TARGET, plugin = %self.name, pid = ?process.id(), "killing plugin");
            process.terminate();
        }
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        self.kill();
    }
}
