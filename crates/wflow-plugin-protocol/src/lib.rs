//! Wire protocol shared by the wflow plugin host and plugin processes.
//!
//! The pieces, from the bottom up:
//!
//! - [`value`]: the tagged value type and the conversions applied at the
//!   boundary.
//! - [`handshake`]: the announcement line a plugin prints once it listens.
//! - [`wire`] and [`messages`]: frames and per-method payloads.
//! - [`mux`]: a bidirectional connection multiplexing logical channels, plus
//!   the broker used to expose the host callback service to the plugin.

pub mod error;
pub mod handshake;
pub mod messages;
pub mod mux;
pub mod stream;
pub mod value;
pub mod wire;

pub use error::RpcError;
pub use handshake::{Announcement, HandshakeConfig, HandshakeError, Network};
pub use mux::{Broker, ChannelClient, Connection, Role, Service};
pub use stream::Stream;
pub use value::{ValueError, ValueMap, WireMap, WireValue};
pub use wire::{Fault, FaultCode, Frame, PRIMARY_CHANNEL};
