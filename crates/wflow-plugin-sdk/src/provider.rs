//! Traits a plugin implements to expose modules and steps.
//!
//! Every method has a default so a plugin only overrides what it offers. The
//! defaults answer the way a plugin without that capability should: empty
//! type lists, "does not provide" creation errors and no configuration
//! fragment.

use std::collections::BTreeMap;

use wflow_plugin_protocol::ValueMap;
use wflow_plugin_protocol::messages::{ManifestInfo, ModuleSchema};

use crate::messaging::Messenger;

/// Input handed to [`StepInstance::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInput {
    /// Step configuration with placeholders already resolved by the host.
    pub config: ValueMap,
    /// Data that started the pipeline.
    pub trigger_data: ValueMap,
    /// Outputs of earlier steps keyed by step name.
    pub step_outputs: BTreeMap<String, ValueMap>,
    /// Current merged pipeline values.
    pub current: ValueMap,
    /// Pipeline metadata.
    pub metadata: ValueMap,
}

/// Result of one step execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Values merged into the pipeline.
    pub output: ValueMap,
    /// Whether the pipeline should stop after this step.
    pub stop_pipeline: bool,
}

impl StepOutput {
    /// Output that lets the pipeline continue.
    #[must_use]
    pub const fn new(output: ValueMap) -> Self {
        Self {
            output,
            stop_pipeline: false,
        }
    }

    /// Asks the host to stop the pipeline after this step.
    #[must_use]
    pub const fn stop(mut self) -> Self {
        self.stop_pipeline = true;
        self
    }
}

/// Static file served through `GetAsset`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    /// File contents.
    pub content: Vec<u8>,
    /// MIME type.
    pub content_type: String,
}

/// A module or trigger instance living in the plugin.
///
/// Errors are plain strings; they reach the host as application errors.
pub trait ModuleInstance: Send + Sync {
    /// Prepares the instance after creation.
    ///
    /// # Errors
    ///
    /// Returns a message the host reports for the handle.
    fn init(&self) -> Result<(), String> {
        Ok(())
    }

    /// Starts background work.
    ///
    /// # Errors
    ///
    /// Returns a message the host reports for the handle.
    fn start(&self) -> Result<(), String> {
        Ok(())
    }

    /// Stops background work.
    ///
    /// # Errors
    ///
    /// Returns a message the host reports for the handle.
    fn stop(&self) -> Result<(), String> {
        Ok(())
    }

    /// Handles a named service method.
    ///
    /// # Errors
    ///
    /// The default rejects every method.
    fn invoke(&self, method: &str, args: &ValueMap) -> Result<ValueMap, String> {
        let _ = args;
        Err(format!("method {method} is not supported"))
    }

    /// Receives a messenger bound to this instance's handle.
    ///
    /// Called once, right after creation and before the handle is returned
    /// to the host. Modules that publish or subscribe keep the messenger.
    fn attach_messaging(&mut self, messenger: Messenger) {
        drop(messenger);
    }
}

/// A pipeline step living in the plugin.
pub trait StepInstance: Send + Sync {
    /// Runs the step once.
    ///
    /// # Errors
    ///
    /// Returns a message the host reports as the step's failure.
    fn execute(&self, input: &StepInput) -> Result<StepOutput, String>;
}

/// Entry point of a plugin implementation.
pub trait PluginProvider: Send + Sync {
    /// Manifest reported to the host.
    fn manifest(&self) -> ManifestInfo;

    /// Module type names this plugin creates.
    fn module_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Step type names this plugin creates.
    fn step_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Trigger type names this plugin creates through
    /// [`create_module`](Self::create_module).
    fn trigger_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// UI and validation metadata for the module types.
    fn module_schemas(&self) -> Vec<ModuleSchema> {
        Vec::new()
    }

    /// Creates a module or trigger of `type_name`.
    ///
    /// # Errors
    ///
    /// The default reports that the plugin provides no modules.
    fn create_module(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Box<dyn ModuleInstance>, String> {
        let _ = (type_name, name, config);
        Err(String::from("plugin does not provide modules"))
    }

    /// Creates a step of `type_name`.
    ///
    /// # Errors
    ///
    /// The default reports that the plugin provides no steps.
    fn create_step(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Box<dyn StepInstance>, String> {
        let _ = (type_name, name, config);
        Err(String::from("plugin does not provide steps"))
    }

    /// YAML merged into the host configuration, if any.
    fn config_fragment(&self) -> Option<String> {
        None
    }

    /// Static asset at `path`.
    ///
    /// # Errors
    ///
    /// The default reports every asset as missing.
    fn asset(&self, path: &str) -> Result<Asset, String> {
        Err(format!("asset {path} not found"))
    }
}
