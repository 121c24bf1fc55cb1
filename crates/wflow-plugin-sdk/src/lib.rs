//! Plugin-side toolkit for wflow external plugins.
//!
//! A plugin binary implements [`PluginProvider`] and hands it to [`serve`]
//! from `main`. The SDK performs the handshake, answers the host's calls by
//! handle and gives message-aware modules a [`Messenger`] for publishing and
//! subscribing through the host.
//!
//! ```rust,no_run
//! use wflow_plugin_sdk::messages::ManifestInfo;
//! use wflow_plugin_sdk::{
//!     PluginProvider, StepInput, StepInstance, StepOutput, ValueMap, serve,
//! };
//!
//! struct Upper;
//!
//! impl StepInstance for Upper {
//!     fn execute(&self, input: &StepInput) -> Result<StepOutput, String> {
//!         let text = input.config.get("text").and_then(|v| v.as_str()).unwrap_or("");
//!         let mut output = ValueMap::new();
//!         output.insert("text".into(), text.to_uppercase().into());
//!         Ok(StepOutput::new(output))
//!     }
//! }
//!
//! struct Plugin;
//!
//! impl PluginProvider for Plugin {
//!     fn manifest(&self) -> ManifestInfo {
//!         ManifestInfo {
//!             name: "upper".into(),
//!             version: "0.1.0".into(),
//!             ..ManifestInfo::default()
//!         }
//!     }
//!
//!     fn step_types(&self) -> Vec<String> {
//!         vec!["upper.text".into()]
//!     }
//!
//!     fn create_step(
//!         &self,
//!         _type_name: &str,
//!         _name: &str,
//!         _config: &ValueMap,
//!     ) -> Result<Box<dyn StepInstance>, String> {
//!         Ok(Box::new(Upper))
//!     }
//! }
//!
//! fn main() -> Result<(), wflow_plugin_sdk::SdkError> {
//!     serve(Plugin)
//! }
//! ```

pub mod error;
pub mod messaging;
pub mod provider;
mod serve;
pub mod server;

pub use wflow_plugin_protocol::messages;
pub use wflow_plugin_protocol::messages::LogLevel;
pub use wflow_plugin_protocol::ValueMap;

pub use self::error::SdkError;
pub use self::messaging::{HostClient, MessageHandler, Messenger, Metadata};
pub use self::provider::{
    Asset, ModuleInstance, PluginProvider, StepInput, StepInstance, StepOutput,
};
pub use self::serve::{check_environment, serve, serve_with};
pub use self::server::PluginServer;
