//! Errors raised on the plugin side of a connection.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use wflow_plugin_protocol::RpcError;

/// Failure while serving the host or calling back into it.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// The process was not started by a wflow host.
    #[error(
        "this binary is a wflow plugin and must be started by the plugin host \
         ({key} is not set)"
    )]
    NotLaunchedByHost {
        /// Environment variable that was expected.
        key: String,
    },
    /// The host passed an unexpected magic cookie.
    #[error("magic cookie in {key} does not match this plugin")]
    CookieMismatch {
        /// Environment variable holding the cookie.
        key: String,
    },
    /// The listener could not be bound or accept a connection.
    #[error("failed to {action}: {source}")]
    Listener {
        /// What was being attempted.
        action: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The handshake line could not be written to stdout.
    #[error("failed to announce the plugin address: {source}")]
    Announce {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Messaging was used before the host connected.
    #[error("the host callback channel is not connected yet")]
    NotConnected,
    /// A call to the host did not complete.
    #[error("{operation} callback failed: {source}")]
    Callback {
        /// Callback method.
        operation: &'static str,
        /// Transport failure.
        #[source]
        source: RpcError,
    },
    /// The host completed a call but reported an error.
    #[error("{operation} rejected by host: {message}")]
    Rejected {
        /// Callback method.
        operation: &'static str,
        /// Error reported by the host.
        message: String,
    },
}

impl SdkError {
    pub(crate) fn listener(action: &'static str, source: io::Error) -> Self {
        Self::Listener {
            action,
            source: Arc::new(source),
        }
    }

    pub(crate) const fn callback(operation: &'static str, source: RpcError) -> Self {
        Self::Callback { operation, source }
    }

    /// Maps a non-empty `error` field from the host into [`Self::Rejected`].
    pub(crate) fn check(operation: &'static str, error: String) -> Result<(), Self> {
        if error.is_empty() {
            Ok(())
        } else {
            Err(Self::Rejected {
                operation,
                message: error,
            })
        }
    }
}
