//! End-to-end harness for the wflow plugin host.
//!
//! The crate builds `wflow-echo-plugin`, a real plugin binary backed by
//! [`echo::EchoPlugin`]. The integration tests launch that binary as a
//! child process through the host's plugin manager, so every call crosses
//! the handshake, the multiplexed connection and the callback channel.
//! [`fixtures`] installs the binary into a temporary plugins directory.

pub mod echo;
pub mod fixtures;
