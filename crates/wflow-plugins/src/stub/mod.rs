//! Host-side view of the plugin service.
//!
//! [`PluginService`] is the seam between the proxies and the wire. Its
//! methods take and return host-native values; [`RpcPluginService`] encodes
//! them into tagged wire values and back. Transport failures surface as
//! [`RpcError`]; application failures stay in the returned `error` fields
//! for the caller to interpret.

use std::collections::BTreeMap;

use wflow_plugin_protocol::messages::{
    AssetRequest, AssetResponse, ConfigFragmentResponse, ConnectRequest, ConnectResponse,
    CreateRequest, DeliverMessageRequest, DeliverMessageResponse, Empty, ErrorResponse,
    ExecuteStepRequest, ExecuteStepResponse, HandleRequest, HandleResponse, InvokeServiceRequest,
    InvokeServiceResponse, ManifestInfo, ModuleSchema, ModuleSchemaList, TypeList, plugin_method,
};
use wflow_plugin_protocol::value::{decode_map, encode_map};
use wflow_plugin_protocol::{ChannelClient, RpcError};

use crate::engine::{PipelineContext, ValueMap};

/// Everything sent for one step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInvocation {
    /// Step handle.
    pub handle: String,
    /// Step configuration after placeholder resolution.
    pub config: ValueMap,
    /// Pipeline state at the time of the call.
    pub context: PipelineContext,
}

/// Decoded reply to a step execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReply {
    /// Step output.
    pub output: ValueMap,
    /// Whether the pipeline should stop.
    pub stop_pipeline: bool,
    /// Application error, empty on success.
    pub error: String,
}

/// Decoded reply to a service invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceReply {
    /// Method result.
    pub result: ValueMap,
    /// Application error, empty on success.
    pub error: String,
}

/// A message being handed to a subscribed module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribed module handle.
    pub handle: String,
    /// Topic the message arrived on.
    pub topic: String,
    /// Message body.
    pub payload: Vec<u8>,
    /// Message metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Calls exposed by a running plugin.
pub trait PluginService: Send + Sync {
    /// Live manifest.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn manifest(&self) -> Result<ManifestInfo, RpcError>;
    /// Live module type names.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn module_types(&self) -> Result<Vec<String>, RpcError>;
    /// Live step type names.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn step_types(&self) -> Result<Vec<String>, RpcError>;
    /// Live trigger type names.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn trigger_types(&self) -> Result<Vec<String>, RpcError>;
    /// Module schemas.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn module_schemas(&self) -> Result<Vec<ModuleSchema>, RpcError>;
    /// Creates a module or trigger instance.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn create_module(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<HandleResponse, RpcError>;
    /// Initialises a module.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn init_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
    /// Starts a module.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn start_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
    /// Stops a module.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn stop_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
    /// Releases a module handle.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn destroy_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
    /// Creates a step instance.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn create_step(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<HandleResponse, RpcError>;
    /// Executes a step.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn execute_step(&self, invocation: &StepInvocation) -> Result<StepReply, RpcError>;
    /// Releases a step handle.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn destroy_step(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
    /// Invokes a named method on a module.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn invoke_service(
        &self,
        handle: &str,
        method: &str,
        args: &ValueMap,
    ) -> Result<ServiceReply, RpcError>;
    /// Fetches the plugin's configuration fragment.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn config_fragment(&self) -> Result<ConfigFragmentResponse, RpcError>;
    /// Fetches a bundled asset.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn asset(&self, path: &str) -> Result<AssetResponse, RpcError>;
    /// Delivers a subscribed message.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    fn deliver_message(&self, delivery: &Delivery) -> Result<DeliverMessageResponse, RpcError>;
}

/// [`PluginService`] backed by channel zero of a plugin connection.
#[derive(Debug, Clone)]
pub struct RpcPluginService {
    client: ChannelClient,
}

impl RpcPluginService {
    /// Wraps a client for the plugin's primary channel.
    #[must_use]
    pub const fn new(client: ChannelClient) -> Self {
        Self { client }
    }

    /// Asks the plugin to dispense `service` and tells it where callbacks
    /// are served.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] when the call does not complete.
    pub fn dispense(
        &self,
        service: &str,
        protocol_version: u32,
        callback_channel: u32,
    ) -> Result<ConnectResponse, RpcError> {
        self.client.call(
            plugin_method::CONNECT,
            &ConnectRequest {
                service: service.to_owned(),
                protocol_version,
                callback_channel,
            },
        )
    }

    fn handle_call(&self, method: &str, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.client.call(
            method,
            &HandleRequest {
                handle: handle.to_owned(),
            },
        )
    }

    fn create(
        &self,
        method: &str,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<HandleResponse, RpcError> {
        self.client.call(
            method,
            &CreateRequest {
                type_name: type_name.to_owned(),
                name: name.to_owned(),
                config: encode_map(config)?,
            },
        )
    }

    fn types(&self, method: &str) -> Result<Vec<String>, RpcError> {
        self.client
            .call::<_, TypeList>(method, &Empty {})
            .map(|list| list.types)
    }
}

impl PluginService for RpcPluginService {
    fn manifest(&self) -> Result<ManifestInfo, RpcError> {
        self.client.call(plugin_method::GET_MANIFEST, &Empty {})
    }

    fn module_types(&self) -> Result<Vec<String>, RpcError> {
        self.types(plugin_method::GET_MODULE_TYPES)
    }

    fn step_types(&self) -> Result<Vec<String>, RpcError> {
        self.types(plugin_method::GET_STEP_TYPES)
    }

    fn trigger_types(&self) -> Result<Vec<String>, RpcError> {
        self.types(plugin_method::GET_TRIGGER_TYPES)
    }

    fn module_schemas(&self) -> Result<Vec<ModuleSchema>, RpcError> {
        self.client
            .call::<_, ModuleSchemaList>(plugin_method::GET_MODULE_SCHEMAS, &Empty {})
            .map(|list| list.schemas)
    }

    fn create_module(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<HandleResponse, RpcError> {
        self.create(plugin_method::CREATE_MODULE, type_name, name, config)
    }

    fn init_module(&self, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.handle_call(plugin_method::INIT_MODULE, handle)
    }

    fn start_module(&self, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.handle_call(plugin_method::START_MODULE, handle)
    }

    fn stop_module(&self, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.handle_call(plugin_method::STOP_MODULE, handle)
    }

    fn destroy_module(&self, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.handle_call(plugin_method::DESTROY_MODULE, handle)
    }

    fn create_step(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<HandleResponse, RpcError> {
        self.create(plugin_method::CREATE_STEP, type_name, name, config)
    }

    fn execute_step(&self, invocation: &StepInvocation) -> Result<StepReply, RpcError> {
        let context = &invocation.context;
        let request = ExecuteStepRequest {
            handle: invocation.handle.clone(),
            config: encode_map(&invocation.config)?,
            trigger_data: encode_map(&context.trigger_data)?,
            step_outputs: context
                .step_outputs
                .iter()
                .map(|(name, output)| encode_map(output).map(|encoded| (name.clone(), encoded)))
                .collect::<Result<_, _>>()?,
            current: encode_map(&context.current)?,
            metadata: encode_map(&context.metadata)?,
        };
        let response: ExecuteStepResponse =
            self.client.call(plugin_method::EXECUTE_STEP, &request)?;
        Ok(StepReply {
            output: decode_map(&response.output)?,
            stop_pipeline: response.stop_pipeline,
            error: response.error,
        })
    }

    fn destroy_step(&self, handle: &str) -> Result<ErrorResponse, RpcError> {
        self.handle_call(plugin_method::DESTROY_STEP, handle)
    }

    fn invoke_service(
        &self,
        handle: &str,
        method: &str,
        args: &ValueMap,
    ) -> Result<ServiceReply, RpcError> {
        let response: InvokeServiceResponse = self.client.call(
            plugin_method::INVOKE_SERVICE,
            &InvokeServiceRequest {
                handle: handle.to_owned(),
                method: method.to_owned(),
                args: encode_map(args)?,
            },
        )?;
        Ok(ServiceReply {
            result: decode_map(&response.result)?,
            error: response.error,
        })
    }

    fn config_fragment(&self) -> Result<ConfigFragmentResponse, RpcError> {
        self.client.call(plugin_method::GET_CONFIG_FRAGMENT, &Empty {})
    }

    fn asset(&self, path: &str) -> Result<AssetResponse, RpcError> {
        self.client.call(
            plugin_method::GET_ASSET,
            &AssetRequest {
                path: path.to_owned(),
            },
        )
    }

    fn deliver_message(&self, delivery: &Delivery) -> Result<DeliverMessageResponse, RpcError> {
        self.client.call(
            plugin_method::DELIVER_MESSAGE,
            &DeliverMessageRequest {
                handle: delivery.handle.clone(),
                topic: delivery.topic.clone(),
                payload: delivery.payload.clone(),
                metadata: delivery.metadata.clone(),
            },
        )
    }
}

#[cfg(test)]
pub(crate) mod tests;
