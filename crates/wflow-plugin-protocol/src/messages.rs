//! Request and response payloads for the plugin and callback services.
//!
//! Application failures travel inside successful responses as non-empty
//! `error` strings. Transport failures never appear here; they are
//! [`Fault`](crate::wire::Fault)s or connection errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::WireMap;

/// Method names of the primary plugin service.
pub mod plugin_method {
    /// Dispense the primary service and announce the callback channel.
    pub const CONNECT: &str = "Connect";
    /// Fetch the plugin's live manifest.
    pub const GET_MANIFEST: &str = "GetManifest";
    /// List module types.
    pub const GET_MODULE_TYPES: &str = "GetModuleTypes";
    /// List step types.
    pub const GET_STEP_TYPES: &str = "GetStepTypes";
    /// List trigger types.
    pub const GET_TRIGGER_TYPES: &str = "GetTriggerTypes";
    /// Fetch module schemas.
    pub const GET_MODULE_SCHEMAS: &str = "GetModuleSchemas";
    /// Create a module or trigger instance.
    pub const CREATE_MODULE: &str = "CreateModule";
    /// Initialise a module.
    pub const INIT_MODULE: &str = "InitModule";
    /// Start a module.
    pub const START_MODULE: &str = "StartModule";
    /// Stop a module.
    pub const STOP_MODULE: &str = "StopModule";
    /// Release a module handle.
    pub const DESTROY_MODULE: &str = "DestroyModule";
    /// Create a step instance.
    pub const CREATE_STEP: &str = "CreateStep";
    /// Execute a step.
    pub const EXECUTE_STEP: &str = "ExecuteStep";
    /// Release a step handle.
    pub const DESTROY_STEP: &str = "DestroyStep";
    /// Invoke a named service method on a module.
    pub const INVOKE_SERVICE: &str = "InvokeService";
    /// Fetch the plugin's configuration fragment.
    pub const GET_CONFIG_FRAGMENT: &str = "GetConfigFragment";
    /// Fetch a static asset bundled with the plugin.
    pub const GET_ASSET: &str = "GetAsset";
    /// Deliver a subscribed message to a module.
    pub const DELIVER_MESSAGE: &str = "DeliverMessage";
}

/// Method names of the host callback service.
pub mod callback_method {
    /// Ask the host to start a workflow.
    pub const TRIGGER_WORKFLOW: &str = "TriggerWorkflow";
    /// Ask whether a named host service exists.
    pub const GET_SERVICE: &str = "GetService";
    /// Emit a log line through the host.
    pub const LOG: &str = "Log";
    /// Publish a message on the host broker.
    pub const PUBLISH_MESSAGE: &str = "PublishMessage";
    /// Subscribe a module handle to a topic.
    pub const SUBSCRIBE: &str = "Subscribe";
    /// Cancel a subscription.
    pub const UNSUBSCRIBE: &str = "Unsubscribe";
}

/// Sent by the host on channel zero right after dialling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Service the host expects to be dispensed.
    pub service: String,
    /// Application protocol version the host speaks.
    pub protocol_version: u32,
    /// Channel on which the host serves callbacks.
    pub callback_channel: u32,
}

/// Reply to [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    /// Service actually dispensed.
    pub service: String,
    /// Application protocol version the plugin speaks.
    pub protocol_version: u32,
}

/// Empty parameter or result body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Live manifest reported by a running plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Plugin author.
    #[serde(default)]
    pub author: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
}

/// List of type names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeList {
    /// Type names.
    #[serde(default)]
    pub types: Vec<String>,
}

/// Input or output description of a module schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIoDef {
    /// Port name.
    pub name: String,
    /// Port type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// Configuration field description of a module schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFieldDef {
    /// Field key.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Default value rendered as text.
    #[serde(default)]
    pub default_value: String,
    /// Whether the field must be set.
    #[serde(default)]
    pub required: bool,
    /// Allowed values for enumerated fields.
    #[serde(default)]
    pub options: Vec<String>,
}

/// UI and validation metadata for one module type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSchema {
    /// Module type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Display category.
    #[serde(default)]
    pub category: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Inputs the module consumes.
    #[serde(default)]
    pub inputs: Vec<ServiceIoDef>,
    /// Outputs the module produces.
    #[serde(default)]
    pub outputs: Vec<ServiceIoDef>,
    /// Configuration fields.
    #[serde(default)]
    pub config_fields: Vec<ConfigFieldDef>,
}

/// Reply to `GetModuleSchemas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSchemaList {
    /// Schemas in plugin order.
    #[serde(default)]
    pub schemas: Vec<ModuleSchema>,
}

/// Parameters of `CreateModule` and `CreateStep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Type to instantiate.
    pub type_name: String,
    /// Instance name from the host configuration.
    pub name: String,
    /// Instance configuration.
    #[serde(default)]
    pub config: WireMap,
}

/// Reply carrying a freshly minted handle or an application error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleResponse {
    /// Opaque handle; empty when `error` is set.
    #[serde(default)]
    pub handle: String,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Parameters naming an existing handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRequest {
    /// Target handle.
    pub handle: String,
}

/// Reply that can only carry an application error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

impl ErrorResponse {
    /// Successful reply.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            error: String::new(),
        }
    }

    /// Failed reply.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Parameters of `ExecuteStep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStepRequest {
    /// Step handle.
    pub handle: String,
    /// Step configuration with placeholders already resolved.
    #[serde(default)]
    pub config: WireMap,
    /// Data that started the pipeline.
    #[serde(default)]
    pub trigger_data: WireMap,
    /// Outputs of earlier steps keyed by step name.
    #[serde(default)]
    pub step_outputs: BTreeMap<String, WireMap>,
    /// Current merged pipeline values.
    #[serde(default)]
    pub current: WireMap,
    /// Pipeline metadata.
    #[serde(default)]
    pub metadata: WireMap,
}

/// Reply to `ExecuteStep`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStepResponse {
    /// Step output.
    #[serde(default)]
    pub output: WireMap,
    /// Whether the pipeline should stop after this step.
    #[serde(default)]
    pub stop_pipeline: bool,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Parameters of `InvokeService`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeServiceRequest {
    /// Module handle.
    pub handle: String,
    /// Service method name.
    pub method: String,
    /// Method arguments.
    #[serde(default)]
    pub args: WireMap,
}

/// Reply to `InvokeService`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeServiceResponse {
    /// Method result.
    #[serde(default)]
    pub result: WireMap,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Reply to `GetConfigFragment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFragmentResponse {
    /// YAML fragment, empty when the plugin contributes none.
    #[serde(default)]
    pub yaml_config: String,
    /// Directory the plugin runs in.
    #[serde(default)]
    pub plugin_dir: String,
}

/// Parameters of `GetAsset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequest {
    /// Asset path relative to the plugin's asset root.
    pub path: String,
}

/// Reply to `GetAsset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    /// Asset contents.
    #[serde(default)]
    pub content: Vec<u8>,
    /// MIME type.
    #[serde(default)]
    pub content_type: String,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Parameters of `DeliverMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverMessageRequest {
    /// Subscribed module handle.
    pub handle: String,
    /// Topic the message arrived on.
    pub topic: String,
    /// Message body.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Message metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Reply to `DeliverMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverMessageResponse {
    /// Whether a handler accepted the message.
    #[serde(default)]
    pub acknowledged: bool,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Parameters of `TriggerWorkflow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflowRequest {
    /// Trigger type asking for the workflow.
    pub trigger_type: String,
    /// Workflow action to run.
    pub action: String,
    /// Trigger payload.
    #[serde(default)]
    pub data: WireMap,
}

/// Parameters of `GetService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetServiceRequest {
    /// Service name.
    pub name: String,
}

/// Reply to `GetService`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetServiceResponse {
    /// Whether the host knows the service.
    pub found: bool,
}

/// Severity of a plugin log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

/// Parameters of `Log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    /// Severity.
    #[serde(default)]
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Structured fields.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Parameters of `PublishMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessageRequest {
    /// Publishing module handle.
    pub handle: String,
    /// Destination topic.
    pub topic: String,
    /// Message body.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Message metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Reply to `PublishMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessageResponse {
    /// Broker-assigned message id.
    #[serde(default)]
    pub message_id: String,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

/// Parameters of `Subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Subscribing module handle.
    pub handle: String,
    /// Broker name; empty selects the host default.
    #[serde(default)]
    pub broker: String,
    /// Topic to follow.
    pub topic: String,
}

/// Parameters of `Unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Subscribed module handle.
    pub handle: String,
    /// Topic to stop following.
    pub topic: String,
}
