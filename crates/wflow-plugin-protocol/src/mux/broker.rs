//! Sub-channel allocation on a multiplexed connection.

use std::sync::Arc;

use super::{ChannelClient, Connection, Service};

/// Allocates sub-channels on a connection and binds services to them.
///
/// The host uses a broker to expose its callback service to the plugin on a
/// channel it allocates, then tells the plugin which id to dial.
#[derive(Debug, Clone)]
pub struct Broker {
    connection: Connection,
}

impl Broker {
    /// Wraps `connection`.
    #[must_use]
    pub const fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Reserves a fresh channel id. Ids never collide with the peer's.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.connection.allocate_channel()
    }

    /// Serves `service` on `id`.
    pub fn accept_and_serve(&self, id: u32, service: Arc<dyn Service>) {
        self.connection.serve(id, service);
    }

    /// Connects to the peer's service on `id`.
    #[must_use]
    pub fn dial(&self, id: u32) -> ChannelClient {
        self.connection.channel(id)
    }
}
