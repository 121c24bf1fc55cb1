//! The echo plugin: one of everything, doing as little as possible.
//!
//! - `echo.module` subscribes to an inbound topic on start and republishes
//!   every payload to an outbound topic. It answers the `echo` and
//!   `received` service methods.
//! - `echo.step` returns its configuration merged over the current values.
//! - `echo.sleep` blocks for `millis` before answering.
//! - `echo.trigger` asks the host to start a workflow when started.
//!
//! The plugin also ships a configuration fragment and one asset.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use wflow_plugin_sdk::messages::{ConfigFieldDef, ManifestInfo, ModuleSchema};
use wflow_plugin_sdk::{
    Asset, LogLevel, MessageHandler, Messenger, Metadata, ModuleInstance, PluginProvider,
    StepInput, StepInstance, StepOutput, ValueMap,
};

/// Plugin name.
pub const PLUGIN_NAME: &str = "echo";
/// Message-relaying module type.
pub const MODULE_TYPE: &str = "echo.module";
/// Step type echoing its input.
pub const STEP_TYPE: &str = "echo.step";
/// Step type that sleeps.
pub const SLEEP_STEP_TYPE: &str = "echo.sleep";
/// Trigger type.
pub const TRIGGER_TYPE: &str = "echo.trigger";
/// Default topic `echo.module` listens on.
pub const DEFAULT_INBOUND: &str = "echo.events";
/// Default topic `echo.module` republishes to.
pub const DEFAULT_OUTBOUND: &str = "echo.replies";
/// Path of the bundled asset.
pub const GREETING_ASSET: &str = "hello.txt";
/// Contents of the bundled asset.
pub const GREETING: &[u8] = b"hello from echo\n";

const FRAGMENT: &str = "echo:\n  root: assets\n  greeting: hello\n";

/// The echo plugin provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPlugin;

impl PluginProvider for EchoPlugin {
    fn manifest(&self) -> ManifestInfo {
        ManifestInfo {
            name: PLUGIN_NAME.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            author: String::from("wflow"),
            description: String::from("Echoes steps and relays messages"),
        }
    }

    fn module_types(&self) -> Vec<String> {
        vec![MODULE_TYPE.to_owned()]
    }

    fn step_types(&self) -> Vec<String> {
        vec![STEP_TYPE.to_owned(), SLEEP_STEP_TYPE.to_owned()]
    }

    fn trigger_types(&self) -> Vec<String> {
        vec![TRIGGER_TYPE.to_owned()]
    }

    fn module_schemas(&self) -> Vec<ModuleSchema> {
        let topic = |name: &str, default: &str| ConfigFieldDef {
            name: name.to_owned(),
            type_name: String::from("string"),
            default_value: default.to_owned(),
            ..ConfigFieldDef::default()
        };
        vec![ModuleSchema {
            type_name: MODULE_TYPE.to_owned(),
            label: String::from("Echo relay"),
            category: String::from("messaging"),
            description: String::from("Republishes every inbound message"),
            config_fields: vec![
                topic("inbound", DEFAULT_INBOUND),
                topic("outbound", DEFAULT_OUTBOUND),
            ],
            ..ModuleSchema::default()
        }]
    }

    fn create_module(
        &self,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Box<dyn ModuleInstance>, String> {
        match type_name {
            MODULE_TYPE => Ok(Box::new(Relay::new(name, config))),
            TRIGGER_TYPE => Ok(Box::new(Emitter {
                name: name.to_owned(),
                data: config.clone(),
                messenger: None,
            })),
            other => Err(format!("unknown module type: {other}")),
        }
    }

    fn create_step(
        &self,
        type_name: &str,
        _name: &str,
        _config: &ValueMap,
    ) -> Result<Box<dyn StepInstance>, String> {
        match type_name {
            STEP_TYPE => Ok(Box::new(Echo)),
            SLEEP_STEP_TYPE => Ok(Box::new(Sleep)),
            other => Err(format!("unknown step type: {other}")),
        }
    }

    fn config_fragment(&self) -> Option<String> {
        Some(FRAGMENT.to_owned())
    }

    fn asset(&self, path: &str) -> Result<Asset, String> {
        if path == GREETING_ASSET {
            Ok(Asset {
                content: GREETING.to_vec(),
                content_type: String::from("text/plain"),
            })
        } else {
            Err(format!("asset {path} not found"))
        }
    }
}

struct Relay {
    name: String,
    inbound: String,
    outbound: String,
    received: Arc<AtomicUsize>,
    messenger: Option<Messenger>,
}

impl Relay {
    fn new(name: &str, config: &ValueMap) -> Self {
        let topic = |key: &str, default: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_owned()
        };
        Self {
            name: name.to_owned(),
            inbound: topic("inbound", DEFAULT_INBOUND),
            outbound: topic("outbound", DEFAULT_OUTBOUND),
            received: Arc::new(AtomicUsize::new(0)),
            messenger: None,
        }
    }

    fn messenger(&self) -> Result<&Messenger, String> {
        self.messenger
            .as_ref()
            .ok_or_else(|| format!("module {} has no messenger", self.name))
    }
}

impl ModuleInstance for Relay {
    fn init(&self) -> Result<(), String> {
        let messenger = self.messenger()?;
        let host = messenger.host().map_err(|error| error.to_string())?;
        let mut fields = Metadata::new();
        fields.insert(String::from("module"), self.name.clone());
        host.log(LogLevel::Info, "echo relay initialised", &fields)
            .map_err(|error| error.to_string())
    }

    fn start(&self) -> Result<(), String> {
        let messenger = self.messenger()?;
        let relay = messenger.clone();
        let outbound = self.outbound.clone();
        let received = Arc::clone(&self.received);
        let handler: MessageHandler = Arc::new(move |payload: &[u8], metadata: &Metadata| {
            received.fetch_add(1, Ordering::SeqCst);
            relay
                .publish(&outbound, payload, metadata)
                .map(drop)
                .map_err(|error| error.to_string())
        });
        messenger
            .subscribe(&self.inbound, handler)
            .map_err(|error| error.to_string())
    }

    fn stop(&self) -> Result<(), String> {
        self.messenger()?
            .unsubscribe(&self.inbound)
            .map_err(|error| error.to_string())
    }

    fn invoke(&self, method: &str, args: &ValueMap) -> Result<ValueMap, String> {
        match method {
            "echo" => Ok(args.clone()),
            "received" => {
                let mut reply = ValueMap::new();
                reply.insert(
                    String::from("count"),
                    Value::from(self.received.load(Ordering::SeqCst)),
                );
                Ok(reply)
            }
            other => Err(format!("method {other} is not supported")),
        }
    }

    fn attach_messaging(&mut self, messenger: Messenger) {
        self.messenger = Some(messenger);
    }
}

struct Emitter {
    name: String,
    data: ValueMap,
    messenger: Option<Messenger>,
}

impl ModuleInstance for Emitter {
    fn start(&self) -> Result<(), String> {
        let messenger = self
            .messenger
            .as_ref()
            .ok_or_else(|| format!("trigger {} has no messenger", self.name))?;
        messenger
            .host()
            .and_then(|host| host.trigger_workflow(TRIGGER_TYPE, &self.name, &self.data))
            .map_err(|error| error.to_string())
    }

    fn attach_messaging(&mut self, messenger: Messenger) {
        self.messenger = Some(messenger);
    }
}

struct Echo;

impl StepInstance for Echo {
    fn execute(&self, input: &StepInput) -> Result<StepOutput, String> {
        let mut output = input.current.clone();
        output.extend(input.config.iter().map(|(key, value)| (key.clone(), value.clone())));
        let stop = input
            .config
            .get("stop")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let result = StepOutput::new(output);
        Ok(if stop { result.stop() } else { result })
    }
}

struct Sleep;

impl StepInstance for Sleep {
    fn execute(&self, input: &StepInput) -> Result<StepOutput, String> {
        // Numbers arrive as floats after crossing the plugin boundary.
        let millis = input
            .config
            .get("millis")
            .and_then(Value::as_f64)
            .filter(|millis| millis.is_finite() && *millis >= 0.0)
            .ok_or_else(|| String::from("millis must be a non-negative number"))?;
        let pause = Duration::try_from_secs_f64(millis)
            .map(|scaled| scaled / 1000)
            .map_err(|error| format!("millis {millis} is out of range: {error}"))?;
        thread::sleep(pause);
        let mut output = ValueMap::new();
        output.insert(String::from("slept"), Value::from(millis));
        Ok(StepOutput::new(output))
    }
}
