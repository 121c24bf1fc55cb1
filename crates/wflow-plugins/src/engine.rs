//! Contracts the workflow engine uses for modules, steps and triggers.
//!
//! Plugin-provided objects implement these traits through remote proxies,
//! so the engine drives them exactly like built-in components.

use std::collections::BTreeMap;
use std::sync::Arc;

pub use wflow_plugin_protocol::ValueMap;

use crate::error::PluginError;

/// Data visible to a step while a pipeline runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    /// Data that started the pipeline.
    pub trigger_data: ValueMap,
    /// Outputs of earlier steps keyed by step name.
    pub step_outputs: BTreeMap<String, ValueMap>,
    /// Current merged values.
    pub current: ValueMap,
    /// Pipeline metadata.
    pub metadata: ValueMap,
}

impl PipelineContext {
    /// Creates a context from the data that triggered the pipeline.
    #[must_use]
    pub fn new(trigger_data: ValueMap) -> Self {
        Self {
            current: trigger_data.clone(),
            trigger_data,
            ..Self::default()
        }
    }

    /// Records a step's output and merges it into the current values.
    pub fn merge_step_output(&mut self, step: &str, output: ValueMap) {
        self.current
            .extend(output.iter().map(|(key, value)| (key.clone(), value.clone())));
        self.step_outputs.insert(step.to_owned(), output);
    }

    /// Sets a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of executing a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    /// Values produced by the step.
    pub output: ValueMap,
    /// Whether the pipeline should stop after this step.
    pub stop_pipeline: bool,
}

/// A long-lived component with a start/stop lifecycle.
pub trait Module: Send + Sync {
    /// Instance name from the configuration.
    fn name(&self) -> &str;
    /// Prepares the module after construction.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn init(&self) -> Result<(), PluginError>;
    /// Starts the module.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn start(&self) -> Result<(), PluginError>;
    /// Stops the module.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn stop(&self) -> Result<(), PluginError>;
    /// Releases the module.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn destroy(&self) -> Result<(), PluginError>;
}

/// A unit of work inside a pipeline.
pub trait Step: Send + Sync {
    /// Instance name from the configuration.
    fn name(&self) -> &str;
    /// Runs the step against the pipeline context.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn execute(&self, context: &PipelineContext) -> Result<StepResult, PluginError>;
    /// Releases the step.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn destroy(&self) -> Result<(), PluginError>;
}

/// A source of workflow executions.
pub trait Trigger: Send + Sync {
    /// Instance name from the configuration.
    fn name(&self) -> &str;
    /// Applies configuration before start.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn configure(&self) -> Result<(), PluginError>;
    /// Starts emitting.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn start(&self) -> Result<(), PluginError>;
    /// Stops emitting.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn stop(&self) -> Result<(), PluginError>;
    /// Releases the trigger.
    ///
    /// # Errors
    ///
    /// Propagates the failure reported by the implementation.
    fn destroy(&self) -> Result<(), PluginError>;
}

/// Builds a module from an instance name and configuration.
pub type ModuleFactory =
    Arc<dyn Fn(&str, &ValueMap) -> Result<Box<dyn Module>, PluginError> + Send + Sync>;

/// Builds a step from an instance name and configuration.
pub type StepFactory =
    Arc<dyn Fn(&str, &ValueMap) -> Result<Box<dyn Step>, PluginError> + Send + Sync>;

/// Builds a trigger from an instance name and configuration.
pub type TriggerFactory =
    Arc<dyn Fn(&str, &ValueMap) -> Result<Box<dyn Trigger>, PluginError> + Send + Sync>;
