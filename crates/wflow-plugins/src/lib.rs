//! External plugin host for the wflow workflow engine.
//!
//! Plugins are separate executables living under a plugins directory. The
//! host starts each one as a child process, reads the handshake line it
//! prints, dials the announced address and talks to it over a multiplexed
//! connection. The plugin can call back into the host on a channel the host
//! serves over that same connection, so the plugin never needs to accept a
//! second inbound connection.
//!
//! # Architecture
//!
//! - [`manager::PluginManager`] loads, unloads, reloads and lists plugins.
//! - [`launcher::ProcessLauncher`] spawns a plugin ([`process`]), connects,
//!   serves the [`callback::CallbackServer`] and dispenses the plugin
//!   service, yielding a [`client::PluginClient`].
//! - [`adapter::ExternalPluginAdapter`] exposes the plugin to the engine as
//!   factories producing [`proxy`] objects that forward every call by
//!   handle.
//! - [`fragment`] merges plugin configuration fragments into the host
//!   configuration; [`template`] resolves step configuration placeholders.
//!
//! Errors are reported through [`PluginError`], whose
//! [`layer`](PluginError::layer) separates process, transport and
//! application failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wflow_plugins::{PluginManager, ProcessLauncher};
//!
//! let manager = PluginManager::new("plugins", Arc::new(ProcessLauncher::default()));
//! let adapter = manager.load_plugin("echo").expect("plugin loads");
//! let steps = adapter.step_factories().expect("step types");
//! # drop(steps);
//! manager.shutdown();
//! ```

pub mod adapter;
pub mod callback;
pub mod client;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod launcher;
pub mod manager;
pub mod manifest;
pub mod process;
pub mod proxy;
pub mod stub;
pub mod template;

#[cfg(test)]
mod tests;

pub use self::adapter::{Asset, EngineManifest, ExternalPluginAdapter};
pub use self::callback::{
    CallbackHooks, CallbackServer, CallbackService, CancelFn, MessageHandler, Metadata,
    PLUGIN_LOG_TARGET, PublishFn, ServiceLookupFn, SubscribeFn, TriggerFn,
};
pub use self::client::{PluginClient, ProcessHandle};
pub use self::discovery::{PluginDirectoryEntry, discover_plugins};
pub use self::engine::{
    Module, ModuleFactory, PipelineContext, Step, StepFactory, StepResult, Trigger,
    TriggerFactory, ValueMap,
};
pub use self::error::{ErrorLayer, PluginError};
pub use self::fragment::{
    ConfigFragment, ConfigTransformHook, PLUGIN_FRAGMENT_PRIORITY, apply_hooks,
};
pub use self::launcher::{PluginLauncher, ProcessLauncher};
pub use self::manager::PluginManager;
pub use self::manifest::PluginManifest;
pub use self::proxy::{RemoteModule, RemoteStep, RemoteTrigger};
pub use self::stub::{PluginService, RpcPluginService};
pub use self::template::TemplateEngine;
