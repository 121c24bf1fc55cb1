//! Transport error type shared by host and plugin.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::value::ValueError;
use crate::wire::Fault;

/// Failure to carry out a call over a plugin connection.
///
/// These are transport errors: the call did not complete, as opposed to a
/// call that completed and reported an application error.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The connection closed before or while the call was outstanding.
    #[error("plugin connection closed")]
    Closed,
    /// Reading or writing the socket failed.
    #[error("i/o failure on plugin connection: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The request could not be serialised.
    #[error("failed to encode {method} request: {source}")]
    Encode {
        /// Method being called.
        method: String,
        /// Underlying serialisation error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The response did not match the expected shape.
    #[error("failed to decode {method} response: {source}")]
    Decode {
        /// Method being called.
        method: String,
        /// Underlying deserialisation error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The remote side reported a fault.
    #[error("{method} failed remotely: {fault}")]
    Fault {
        /// Method being called.
        method: String,
        /// Fault reported by the peer.
        #[source]
        fault: Fault,
    },
    /// A value could not be converted at the boundary.
    #[error(transparent)]
    Value(#[from] ValueError),
}

impl RpcError {
    pub(crate) fn io(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}
