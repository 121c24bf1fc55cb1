//! Errors raised by the external plugin host.
//!
//! Failures fall into three layers that callers need to tell apart:
//!
//! - process: the plugin could not be located, started, or handshaken with;
//! - transport: a call to a running plugin did not complete;
//! - application: the call completed and the plugin reported an error.
//!
//! [`PluginError::layer`] classifies every variant. I/O errors are wrapped in
//! `Arc` so the enum stays cheap to clone.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use wflow_plugin_protocol::{HandshakeError, RpcError};

/// Which layer of the stack produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    /// Registry bookkeeping, such as loading a plugin twice.
    Registry,
    /// Locating, validating, spawning, or handshaking with a plugin.
    Process,
    /// A call to a running plugin failed to complete.
    Transport,
    /// The plugin reported a failure in its response.
    Application,
}

/// Errors arising from external plugin operations.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// No plugin directory exists under the configured root.
    #[error("plugin '{name}' not found in {}", .directory.display())]
    NotFound {
        /// Requested plugin name.
        name: String,
        /// Directory that was checked.
        directory: PathBuf,
    },

    /// A plugin with this name is already loaded.
    #[error("plugin '{name}' is already loaded")]
    AlreadyLoaded {
        /// Plugin name.
        name: String,
    },

    /// No plugin with this name is loaded.
    #[error("plugin '{name}' is not loaded")]
    NotLoaded {
        /// Plugin name.
        name: String,
    },

    /// The manifest is missing, unreadable, or invalid.
    #[error("manifest error for plugin '{name}': {message}")]
    Manifest {
        /// Plugin name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The plugin executable is absent or not a regular file.
    #[error("plugin '{name}' executable not found: {}", .path.display())]
    ExecutableNotFound {
        /// Plugin name.
        name: String,
        /// Path that was checked.
        path: PathBuf,
    },

    /// The plugin process could not be spawned.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The plugin exited or closed stdout before announcing itself.
    #[error("plugin '{name}' exited before completing the handshake")]
    ExitedDuringHandshake {
        /// Plugin name.
        name: String,
    },

    /// The plugin did not announce itself in time.
    #[error("plugin '{name}' did not complete the handshake within {timeout_ms}ms")]
    HandshakeTimeout {
        /// Plugin name.
        name: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u128,
    },

    /// The announcement was malformed or incompatible.
    #[error("plugin '{name}' handshake rejected: {source}")]
    Handshake {
        /// Plugin name.
        name: String,
        /// Parse or verification failure.
        #[source]
        source: HandshakeError,
    },

    /// The announced address could not be dialled.
    #[error("failed to connect to plugin '{name}' at {address}: {source}")]
    Connect {
        /// Plugin name.
        name: String,
        /// Announced address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The plugin dispensed something other than the expected service.
    #[error("plugin '{name}' dispensed '{actual}' instead of '{expected}'")]
    DispenseMismatch {
        /// Plugin name.
        name: String,
        /// Service the host asked for.
        expected: String,
        /// Service the plugin reported.
        actual: String,
    },

    /// An I/O error occurred while managing the plugin process.
    #[error("I/O error for plugin '{name}': {source}")]
    Io {
        /// Plugin name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A call to the plugin did not complete.
    #[error("{operation}{} failed in transport: {source}", describe_handle(.handle.as_deref()))]
    Transport {
        /// Remote operation name.
        operation: &'static str,
        /// Handle the call targeted, if any.
        handle: Option<String>,
        /// Underlying transport failure.
        #[source]
        source: RpcError,
    },

    /// The plugin completed the call and reported an error.
    #[error("{operation}{} failed: {message}", describe_handle(.handle.as_deref()))]
    Application {
        /// Remote operation name.
        operation: &'static str,
        /// Handle the call targeted, if any.
        handle: Option<String>,
        /// Error text reported by the plugin.
        message: String,
    },

    /// A configuration template could not be resolved.
    #[error("template error: {message}")]
    Template {
        /// Description of the failure, prefixed with the field path.
        message: String,
    },

    /// A plugin configuration fragment could not be applied.
    #[error("config fragment from plugin '{name}' rejected: {message}")]
    Fragment {
        /// Plugin name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

impl PluginError {
    /// Classifies the error by the layer that produced it.
    #[must_use]
    pub const fn layer(&self) -> ErrorLayer {
        match self {
            Self::AlreadyLoaded { .. } | Self::NotLoaded { .. } => ErrorLayer::Registry,
            Self::NotFound { .. }
            | Self::Manifest { .. }
            | Self::ExecutableNotFound { .. }
            | Self::SpawnFailed { .. }
            | Self::ExitedDuringHandshake { .. }
            | Self::HandshakeTimeout { .. }
            | Self::Handshake { .. }
            | Self::Connect { .. }
            | Self::DispenseMismatch { .. }
            | Self::Io { .. } => ErrorLayer::Process,
            Self::Transport { .. } => ErrorLayer::Transport,
            Self::Application { .. } | Self::Template { .. } | Self::Fragment { .. } => {
                ErrorLayer::Application
            }
        }
    }

    pub(crate) fn transport(operation: &'static str, handle: Option<&str>, source: RpcError) -> Self {
        Self::Transport {
            operation,
            handle: handle.map(str::to_owned),
            source,
        }
    }

    pub(crate) fn application(
        operation: &'static str,
        handle: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Application {
            operation,
            handle: handle.map(str::to_owned),
            message: message.into(),
        }
    }

    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_owned(),
            source: Arc::new(source),
        }
    }
}

fn describe_handle(handle: Option<&str>) -> String {
    handle.map_or_else(String::new, |handle| format!(" on handle {handle}"))
}
