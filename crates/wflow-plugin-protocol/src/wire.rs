//! Frames exchanged on a multiplexed plugin connection.
//!
//! Each frame is one JSON document terminated by a newline. Requests carry
//! the logical channel they target and a request id unique to the sender;
//! responses echo both.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel carrying the plugin's primary service.
pub const PRIMARY_CHANNEL: u32 = 0;

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Call to a service registered on `channel`.
    Request {
        /// Target logical channel.
        channel: u32,
        /// Sender-scoped request id.
        id: u64,
        /// Method name.
        method: String,
        /// Method parameters.
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Reply to an earlier request.
    Response {
        /// Channel the request targeted.
        channel: u32,
        /// Id of the request being answered.
        id: u64,
        /// Result payload on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        /// Transport-level failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<Fault>,
    },
}

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// No service is registered on the requested channel.
    UnknownChannel,
    /// The service does not implement the method.
    UnknownMethod,
    /// The parameters could not be decoded.
    InvalidParams,
    /// The method is known but deliberately not implemented.
    Unimplemented,
    /// The service failed while handling the call.
    Internal,
}

/// Transport-level failure reported by the remote side.
///
/// Faults are distinct from the `error` fields carried inside successful
/// responses: a fault means the call itself could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct Fault {
    /// Failure category.
    pub code: FaultCode,
    /// Human-readable description.
    pub message: String,
}

impl Fault {
    /// Creates a fault.
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault for an unrecognised method.
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(FaultCode::UnknownMethod, format!("unknown method: {method}"))
    }

    /// Fault for parameters that failed to decode.
    #[must_use]
    pub fn invalid_params(method: &str, error: &serde_json::Error) -> Self {
        Self::new(
            FaultCode::InvalidParams,
            format!("invalid parameters for {method}: {error}"),
        )
    }
}

/// Decodes request parameters into `T`.
///
/// # Errors
///
/// Returns an [`FaultCode::InvalidParams`] fault when decoding fails.
pub fn params<T: serde::de::DeserializeOwned>(
    method: &str,
    value: serde_json::Value,
) -> Result<T, Fault> {
    serde_json::from_value(value).map_err(|error| Fault::invalid_params(method, &error))
}

/// Encodes a response payload.
///
/// # Errors
///
/// Returns an [`FaultCode::Internal`] fault when encoding fails.
pub fn reply<T: Serialize>(value: &T) -> Result<serde_json::Value, Fault> {
    serde_json::to_value(value)
        .map_err(|error| Fault::new(FaultCode::Internal, format!("failed to encode reply: {error}")))
}
