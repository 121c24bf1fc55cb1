//! Plugin service answering the host on the primary channel.
//!
//! Instances created for the host are kept in handle tables. Handles are
//! random UUIDs; the host never sees the instances themselves. Unknown
//! handles are reported as application errors so a stale proxy on the host
//! gets a readable message instead of a broken connection.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use uuid::Uuid;

use wflow_plugin_protocol::handshake::{APP_PROTOCOL_VERSION, PLUGIN_SERVICE_NAME};
use wflow_plugin_protocol::messages::{
    AssetRequest, AssetResponse, ConfigFragmentResponse, ConnectRequest, ConnectResponse,
    CreateRequest, DeliverMessageRequest, DeliverMessageResponse, ErrorResponse,
    ExecuteStepRequest, ExecuteStepResponse, HandleRequest, HandleResponse, InvokeServiceRequest,
    InvokeServiceResponse, ModuleSchemaList, TypeList, plugin_method,
};
use wflow_plugin_protocol::value::{ValueError, WireMap, decode_map, encode_map};
use wflow_plugin_protocol::wire::{self, Fault, FaultCode};
use wflow_plugin_protocol::{Broker, Connection, Service, ValueMap};

use crate::messaging::{HandlerTable, HostClient, Messenger};
use crate::provider::{ModuleInstance, PluginProvider, StepInput, StepInstance};

const SERVER_TARGET: &str = "wflow_plugin_sdk::server";

type Table<T> = RwLock<HashMap<String, Arc<T>>>;

/// Dispatches plugin service calls to a [`PluginProvider`].
pub struct PluginServer {
    provider: Box<dyn PluginProvider>,
    broker: Option<Broker>,
    host: Arc<OnceLock<HostClient>>,
    modules: Table<dyn ModuleInstance>,
    steps: Table<dyn StepInstance>,
    handlers: Arc<HandlerTable>,
}

impl fmt::Debug for PluginServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginServer")
            .field("connected", &self.host.get().is_some())
            .field("modules", &read(&self.modules).len())
            .field("steps", &read(&self.steps).len())
            .finish_non_exhaustive()
    }
}

impl PluginServer {
    /// Creates a server for `provider` with no host connection.
    #[must_use]
    pub fn new(provider: impl PluginProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            broker: None,
            host: Arc::new(OnceLock::new()),
            modules: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            handlers: Arc::new(HandlerTable::default()),
        }
    }

    /// Uses `connection` to dial the host's callback channel on `Connect`.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.broker = Some(Broker::new(connection));
        self
    }

    /// Number of live module and step handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        read(&self.modules).len() + read(&self.steps).len()
    }

    fn connect(&self, request: &ConnectRequest) -> Result<ConnectResponse, Fault> {
        if request.service != PLUGIN_SERVICE_NAME {
            return Err(Fault::new(
                FaultCode::Unimplemented,
                format!("plugin does not dispense service {}", request.service),
            ));
        }
        if let Some(broker) = &self.broker {
            let client = HostClient::new(broker.dial(request.callback_channel));
            if self.host.set(client).is_err() {
                debug!(
                    target: SERVER_TARGET,
                    "host reconnected; keeping the first callback channel"
                );
            }
        }
        info!(
            target: SERVER_TARGET,
            callback_channel = request.callback_channel,
            host_version = request.protocol_version,
            "host connected"
        );
        Ok(ConnectResponse {
            service: PLUGIN_SERVICE_NAME.to_owned(),
            protocol_version: APP_PROTOCOL_VERSION,
        })
    }

    fn create_module(&self, request: &CreateRequest) -> Result<HandleResponse, Fault> {
        let config = decode(&request.config)?;
        let created = self
            .provider
            .create_module(&request.type_name, &request.name, &config);
        Ok(match created {
            Ok(mut module) => {
                let handle = Uuid::new_v4().to_string();
                module.attach_messaging(Messenger::new(
                    handle.clone(),
                    Arc::clone(&self.host),
                    Arc::clone(&self.handlers),
                ));
                write(&self.modules).insert(handle.clone(), Arc::from(module));
                debug!(
                    target: SERVER_TARGET,
                    handle = %handle,
                    type_name = %request.type_name,
                    name = %request.name,
                    "module created"
                );
                handle_reply(handle)
            }
            Err(error) => HandleResponse {
                handle: String::new(),
                error,
            },
        })
    }

    fn create_step(&self, request: &CreateRequest) -> Result<HandleResponse, Fault> {
        let config = decode(&request.config)?;
        let created = self
            .provider
            .create_step(&request.type_name, &request.name, &config);
        Ok(match created {
            Ok(step) => {
                let handle = Uuid::new_v4().to_string();
                write(&self.steps).insert(handle.clone(), Arc::from(step));
                debug!(
                    target: SERVER_TARGET,
                    handle = %handle,
                    type_name = %request.type_name,
                    "step created"
                );
                handle_reply(handle)
            }
            Err(error) => HandleResponse {
                handle: String::new(),
                error,
            },
        })
    }

    fn module(&self, handle: &str) -> Result<Arc<dyn ModuleInstance>, String> {
        read(&self.modules)
            .get(handle)
            .cloned()
            .ok_or_else(|| format!("unknown module handle: {handle}"))
    }

    fn step(&self, handle: &str) -> Result<Arc<dyn StepInstance>, String> {
        read(&self.steps)
            .get(handle)
            .cloned()
            .ok_or_else(|| format!("unknown step handle: {handle}"))
    }

    fn module_call(
        &self,
        handle: &str,
        call: impl FnOnce(&dyn ModuleInstance) -> Result<(), String>,
    ) -> ErrorResponse {
        let outcome = self.module(handle).and_then(|module| call(module.as_ref()));
        outcome.map_or_else(ErrorResponse::failed, |()| ErrorResponse::ok())
    }

    fn destroy_module(&self, handle: &str) -> ErrorResponse {
        if write(&self.modules).remove(handle).is_none() {
            return ErrorResponse::failed(format!("unknown module handle: {handle}"));
        }
        self.handlers.remove_handle(handle);
        debug!(target: SERVER_TARGET, handle, "module destroyed");
        ErrorResponse::ok()
    }

    fn destroy_step(&self, handle: &str) -> ErrorResponse {
        if write(&self.steps).remove(handle).is_none() {
            return ErrorResponse::failed(format!("unknown step handle: {handle}"));
        }
        debug!(target: SERVER_TARGET, handle, "step destroyed");
        ErrorResponse::ok()
    }

    fn execute_step(&self, request: &ExecuteStepRequest) -> Result<ExecuteStepResponse, Fault> {
        let input = StepInput {
            config: decode(&request.config)?,
            trigger_data: decode(&request.trigger_data)?,
            step_outputs: request
                .step_outputs
                .iter()
                .map(|(name, output)| Ok((name.clone(), decode(output)?)))
                .collect::<Result<BTreeMap<_, _>, Fault>>()?,
            current: decode(&request.current)?,
            metadata: decode(&request.metadata)?,
        };
        let result = self
            .step(&request.handle)
            .and_then(|step| step.execute(&input))
            .and_then(|output| {
                let encoded = encode_map(&output.output).map_err(|error| error.to_string())?;
                Ok((encoded, output.stop_pipeline))
            });
        Ok(match result {
            Ok((output, stop_pipeline)) => ExecuteStepResponse {
                output,
                stop_pipeline,
                error: String::new(),
            },
            Err(error) => ExecuteStepResponse {
                error,
                ..ExecuteStepResponse::default()
            },
        })
    }

    fn invoke_service(
        &self,
        request: &InvokeServiceRequest,
    ) -> Result<InvokeServiceResponse, Fault> {
        let args = decode(&request.args)?;
        let result = self
            .module(&request.handle)
            .and_then(|module| module.invoke(&request.method, &args))
            .and_then(|result| encode_map(&result).map_err(|error| error.to_string()));
        Ok(match result {
            Ok(result) => InvokeServiceResponse {
                result,
                error: String::new(),
            },
            Err(error) => InvokeServiceResponse {
                result: WireMap::new(),
                error,
            },
        })
    }

    fn config_fragment(&self) -> ConfigFragmentResponse {
        let Some(yaml_config) = self.provider.config_fragment() else {
            return ConfigFragmentResponse::default();
        };
        let plugin_dir = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        ConfigFragmentResponse {
            yaml_config,
            plugin_dir,
        }
    }

    fn asset(&self, path: &str) -> AssetResponse {
        match self.provider.asset(path) {
            Ok(asset) => AssetResponse {
                content: asset.content,
                content_type: asset.content_type,
                error: String::new(),
            },
            Err(error) => AssetResponse {
                error,
                ..AssetResponse::default()
            },
        }
    }

    fn deliver_message(&self, request: &DeliverMessageRequest) -> DeliverMessageResponse {
        let Some(handler) = self.handlers.get(&request.handle, &request.topic) else {
            return DeliverMessageResponse {
                acknowledged: false,
                error: format!(
                    "no message handler for handle {} topic {}",
                    request.handle, request.topic
                ),
            };
        };
        match handler(&request.payload, &request.metadata) {
            Ok(()) => DeliverMessageResponse {
                acknowledged: true,
                error: String::new(),
            },
            Err(error) => DeliverMessageResponse {
                acknowledged: false,
                error,
            },
        }
    }

    fn handle_lifecycle(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Fault> {
        let request: HandleRequest = wire::params(method, params)?;
        let handle = request.handle.as_str();
        let response = match method {
            plugin_method::INIT_MODULE => self.module_call(handle, |module| module.init()),
            plugin_method::START_MODULE => self.module_call(handle, |module| module.start()),
            plugin_method::STOP_MODULE => self.module_call(handle, |module| module.stop()),
            plugin_method::DESTROY_MODULE => self.destroy_module(handle),
            plugin_method::DESTROY_STEP => self.destroy_step(handle),
            other => return Err(Fault::unknown_method(other)),
        };
        wire::reply(&response)
    }
}

impl Service for PluginServer {
    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Fault> {
        match method {
            plugin_method::CONNECT => {
                let request: ConnectRequest = wire::params(method, params)?;
                wire::reply(&self.connect(&request)?)
            }
            plugin_method::GET_MANIFEST => wire::reply(&self.provider.manifest()),
            plugin_method::GET_MODULE_TYPES => wire::reply(&TypeList {
                types: self.provider.module_types(),
            }),
            plugin_method::GET_STEP_TYPES => wire::reply(&TypeList {
                types: self.provider.step_types(),
            }),
            plugin_method::GET_TRIGGER_TYPES => wire::reply(&TypeList {
                types: self.provider.trigger_types(),
            }),
            plugin_method::GET_MODULE_SCHEMAS => wire::reply(&ModuleSchemaList {
                schemas: self.provider.module_schemas(),
            }),
            plugin_method::CREATE_MODULE => {
                let request: CreateRequest = wire::params(method, params)?;
                wire::reply(&self.create_module(&request)?)
            }
            plugin_method::CREATE_STEP => {
                let request: CreateRequest = wire::params(method, params)?;
                wire::reply(&self.create_step(&request)?)
            }
            plugin_method::INIT_MODULE
            | plugin_method::START_MODULE
            | plugin_method::STOP_MODULE
            | plugin_method::DESTROY_MODULE
            | plugin_method::DESTROY_STEP => self.handle_lifecycle(method, params),
            plugin_method::EXECUTE_STEP => {
                let request: ExecuteStepRequest = wire::params(method, params)?;
                wire::reply(&self.execute_step(&request)?)
            }
            plugin_method::INVOKE_SERVICE => {
                let request: InvokeServiceRequest = wire::params(method, params)?;
                wire::reply(&self.invoke_service(&request)?)
            }
            plugin_method::GET_CONFIG_FRAGMENT => wire::reply(&self.config_fragment()),
            plugin_method::GET_ASSET => {
                let request: AssetRequest = wire::params(method, params)?;
                wire::reply(&self.asset(&request.path))
            }
            plugin_method::DELIVER_MESSAGE => {
                let request: DeliverMessageRequest = wire::params(method, params)?;
                wire::reply(&self.deliver_message(&request))
            }
            other => Err(Fault::unknown_method(other)),
        }
    }
}

fn handle_reply(handle: String) -> HandleResponse {
    HandleResponse {
        handle,
        error: String::new(),
    }
}

fn decode(map: &WireMap) -> Result<ValueMap, Fault> {
    decode_map(map)
        .map_err(|error: ValueError| Fault::new(FaultCode::InvalidParams, error.to_string()))
}

fn read<T: ?Sized>(table: &Table<T>) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T: ?Sized>(table: &Table<T>) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}
