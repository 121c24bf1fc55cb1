//! Plugin callbacks routed through the daemon's message broker.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tempfile::TempDir;

use wflow_e2e::echo::{DEFAULT_INBOUND, DEFAULT_OUTBOUND, MODULE_TYPE, PLUGIN_NAME, TRIGGER_TYPE};
use wflow_e2e::fixtures::install_plugin;
use wflow_plugins::{
    MessageHandler, Metadata, Module, PluginManager, ProcessLauncher, RemoteModule, ValueMap,
};
use wflowd::MessageBroker;

const ECHO_BINARY: &str = env!("CARGO_BIN_EXE_wflow-echo-plugin");

type Triggers = Arc<Mutex<Vec<(String, String, ValueMap)>>>;

struct Host {
    _root: TempDir,
    broker: Arc<MessageBroker>,
    triggers: Triggers,
    manager: PluginManager,
}

impl Drop for Host {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

fn host() -> Host {
    let root = TempDir::new().expect("tempdir");
    install_plugin(root.path(), PLUGIN_NAME, "1.0.0", ECHO_BINARY.as_ref()).expect("install");
    let broker = MessageBroker::new();
    let triggers: Triggers = Arc::default();
    let recorded = Arc::clone(&triggers);
    let hooks = broker.hooks().with_trigger(Arc::new(
        move |trigger_type: &str, action: &str, data: &ValueMap| {
            recorded.lock().expect("lock").push((
                trigger_type.to_owned(),
                action.to_owned(),
                data.clone(),
            ));
            Ok(())
        },
    ));
    let launcher = ProcessLauncher::default().with_hooks(hooks);
    let manager = PluginManager::new(root.path(), Arc::new(launcher));
    Host {
        _root: root,
        broker,
        triggers,
        manager,
    }
}

fn recorder() -> (Arc<Mutex<Vec<(String, Metadata)>>>, MessageHandler) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MessageHandler = Arc::new(move |payload: &[u8], metadata: &Metadata| {
        sink.lock().expect("lock").push((
            String::from_utf8_lossy(payload).into_owned(),
            metadata.clone(),
        ));
        Ok(())
    });
    (seen, handler)
}

#[test]
fn relay_module_republishes_through_the_broker() {
    let host = host();
    let adapter = host.manager.load_plugin(PLUGIN_NAME).expect("load");
    let factories = adapter.module_factories().expect("factories");
    let factory = factories.get(MODULE_TYPE).expect("relay factory");
    let module = factory("relay", &ValueMap::new()).expect("create");
    module.init().expect("init");
    module.start().expect("start");
    assert_eq!(host.broker.subscriber_count(DEFAULT_INBOUND), 1);

    let (replies, handler) = recorder();
    let _cancel = host
        .broker
        .subscribe("", DEFAULT_OUTBOUND, handler)
        .expect("subscribe replies");
    let mut metadata = Metadata::new();
    metadata.insert(String::from("trace"), String::from("t-1"));
    drop(host.broker.publish(DEFAULT_INBOUND, b"ping", &metadata));

    assert_eq!(
        *replies.lock().expect("lock"),
        [(String::from("ping"), metadata)]
    );

    module.stop().expect("stop");
    assert_eq!(host.broker.subscriber_count(DEFAULT_INBOUND), 0);
    module.destroy().expect("destroy");
}

#[test]
fn relay_counts_deliveries() {
    let host = host();
    let adapter = host.manager.load_plugin(PLUGIN_NAME).expect("load");
    let config = match json!({"inbound": "audit.in", "outbound": "audit.out"}) {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    };
    let module =
        RemoteModule::create(adapter.client().stub(), MODULE_TYPE, "audit", &config).expect("create");
    module.init().expect("init");
    module.start().expect("start");

    for payload in [b"one".as_slice(), b"two".as_slice()] {
        drop(host.broker.publish("audit.in", payload, &Metadata::new()));
    }
    let reply = module.invoke("received", &ValueMap::new()).expect("invoke");

    assert_eq!(reply.get("count").and_then(Value::as_f64), Some(2.0));
}

#[test]
fn unloading_cancels_plugin_subscriptions() {
    let host = host();
    let adapter = host.manager.load_plugin(PLUGIN_NAME).expect("load");
    let factories = adapter.module_factories().expect("factories");
    let factory = factories.get(MODULE_TYPE).expect("relay factory");
    let module = factory("relay", &ValueMap::new()).expect("create");
    module.init().expect("init");
    module.start().expect("start");

    host.manager.unload_plugin(PLUGIN_NAME).expect("unload");

    assert_eq!(host.broker.subscriber_count(DEFAULT_INBOUND), 0);
}

#[test]
fn triggers_start_workflows_on_the_host() {
    let host = host();
    let adapter = host.manager.load_plugin(PLUGIN_NAME).expect("load");
    let factories = adapter.trigger_factories().expect("factories");
    let factory = factories.get(TRIGGER_TYPE).expect("trigger factory");
    let data = match json!({"order": 42}) {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    };
    let trigger = factory("nightly", &data).expect("create");

    trigger.configure().expect("configure");
    trigger.start().expect("start");

    let recorded = host.triggers.lock().expect("lock").clone();
    let [(trigger_type, action, received)] = recorded.as_slice() else {
        panic!("expected one trigger, got {recorded:?}");
    };
    assert_eq!(trigger_type, TRIGGER_TYPE);
    assert_eq!(action, "nightly");
    assert_eq!(received.keys().collect::<Vec<_>>(), ["order"]);
    assert_eq!(received.get("order").and_then(Value::as_f64), Some(42.0));
    trigger.stop().expect("stop");
    trigger.destroy().expect("destroy");
}
