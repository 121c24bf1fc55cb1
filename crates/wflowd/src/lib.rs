//! Plugin host daemon for the wflow workflow engine.
//!
//! The daemon resolves its configuration through [`wflow_config`], installs
//! structured telemetry, and serves an HTTP management API over a
//! [`wflow_plugins::PluginManager`]. Plugins reach the daemon's in-memory
//! [`MessageBroker`] through the callback channel of their connection, so
//! one plugin's published messages reach every other plugin subscribed to
//! the same topic.
//!
//! Shutdown is triggered by `SIGINT` or `SIGTERM`. The management server
//! drains in-flight requests, then every loaded plugin is stopped.

pub mod api;
mod broker;
mod daemon;
mod telemetry;

pub use broker::{DEFAULT_BROKER, HOST_SERVICES, MessageBroker};
pub use daemon::{Daemon, DaemonError, run};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
