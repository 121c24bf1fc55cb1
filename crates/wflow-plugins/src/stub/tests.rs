//! Test doubles for the plugin service and tests for the RPC encoding.

use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use mockall::mock;
use serde_json::json;

use wflow_plugin_protocol::messages::{
    AssetResponse, ConfigFragmentResponse, DeliverMessageResponse, ErrorResponse,
    ExecuteStepRequest, ExecuteStepResponse, HandleResponse, ManifestInfo, ModuleSchema,
};
use wflow_plugin_protocol::value::WireValue;
use wflow_plugin_protocol::wire::{self, Fault};
use wflow_plugin_protocol::{Connection, Role, RpcError, Service, Stream};

use super::*;

mock! {
    pub PluginService {}

    impl PluginService for PluginService {
        fn manifest(&self) -> Result<ManifestInfo, RpcError>;
        fn module_types(&self) -> Result<Vec<String>, RpcError>;
        fn step_types(&self) -> Result<Vec<String>, RpcError>;
        fn trigger_types(&self) -> Result<Vec<String>, RpcError>;
        fn module_schemas(&self) -> Result<Vec<ModuleSchema>, RpcError>;
        fn create_module(
            &self,
            type_name: &str,
            name: &str,
            config: &ValueMap,
        ) -> Result<HandleResponse, RpcError>;
        fn init_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
        fn start_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
        fn stop_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
        fn destroy_module(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
        fn create_step(
            &self,
            type_name: &str,
            name: &str,
            config: &ValueMap,
        ) -> Result<HandleResponse, RpcError>;
        fn execute_step(&self, invocation: &StepInvocation) -> Result<StepReply, RpcError>;
        fn destroy_step(&self, handle: &str) -> Result<ErrorResponse, RpcError>;
        fn invoke_service(
            &self,
            handle: &str,
            method: &str,
            args: &ValueMap,
        ) -> Result<ServiceReply, RpcError>;
        fn config_fragment(&self) -> Result<ConfigFragmentResponse, RpcError>;
        fn asset(&self, path: &str) -> Result<AssetResponse, RpcError>;
        fn deliver_message(&self, delivery: &Delivery) -> Result<DeliverMessageResponse, RpcError>;
    }
}

pub(crate) fn map(value: serde_json::Value) -> ValueMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Plugin side stand-in that records execute requests.
#[derive(Default)]
struct RecordingPlugin {
    requests: Mutex<Vec<ExecuteStepRequest>>,
}

impl Service for RecordingPlugin {
    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Fault> {
        match method {
            "ExecuteStep" => {
                let request: ExecuteStepRequest = wire::params(method, params)?;
                self.requests.lock().expect("lock").push(request);
                let mut output = wflow_plugin_protocol::WireMap::new();
                output.insert("count".to_owned(), WireValue::Number(3.0));
                wire::reply(&ExecuteStepResponse {
                    output,
                    stop_pipeline: true,
                    error: String::new(),
                })
            }
            "Connect" => wire::reply(&json!({"service": "plugin", "protocolVersion": 1})),
            "GetStepTypes" => wire::reply(&json!({"types": ["step.a", "step.b"]})),
            other => Err(Fault::unknown_method(other)),
        }
    }
}

fn connected(plugin: Arc<RecordingPlugin>) -> (RpcPluginService, Connection, Connection) {
    let (left, right) = UnixStream::pair().expect("socket pair");
    let host = Connection::start(Stream::Unix(left), Role::Host, "host").expect("host");
    let remote = Connection::start(Stream::Unix(right), Role::Plugin, "plugin").expect("plugin");
    remote.serve(0, plugin);
    (RpcPluginService::new(host.channel(0)), host, remote)
}

#[test]
fn execute_step_encodes_every_context_section() {
    let plugin = Arc::new(RecordingPlugin::default());
    let (service, _host, _remote) = connected(Arc::clone(&plugin));
    let mut context = PipelineContext::new(map(json!({"source": "cron"})));
    context.merge_step_output("fetch", map(json!({"id": 7})));
    let invocation = StepInvocation {
        handle: "h-1".to_owned(),
        config: map(json!({"timeout": 30})),
        context,
    };

    let reply = service.execute_step(&invocation).expect("execute");

    assert!(reply.stop_pipeline);
    assert_eq!(reply.output.get("count"), Some(&json!(3.0)));
    let requests = plugin.requests.lock().expect("lock");
    let request = requests.first().expect("one request");
    assert_eq!(request.handle, "h-1");
    assert_eq!(request.config.get("timeout"), Some(&WireValue::Number(30.0)));
    assert_eq!(
        request.step_outputs.get("fetch").and_then(|output| output.get("id")),
        Some(&WireValue::Number(7.0))
    );
    assert_eq!(
        request.trigger_data.get("source"),
        Some(&WireValue::String("cron".to_owned()))
    );
}

#[test]
fn type_lists_and_dispense_decode() {
    let (service, _host, _remote) = connected(Arc::new(RecordingPlugin::default()));
    assert_eq!(service.step_types().expect("types"), ["step.a", "step.b"]);
    let reply = service.dispense("plugin", 1, 3).expect("dispense");
    assert_eq!(reply.service, "plugin");
}

#[test]
fn unimplemented_methods_surface_as_transport_faults() {
    let (service, _host, _remote) = connected(Arc::new(RecordingPlugin::default()));
    let error = service.config_fragment().expect_err("not served");
    assert!(matches!(error, RpcError::Fault { .. }));
}
