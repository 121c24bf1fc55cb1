//! Tests for the host callback server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use rstest::{fixture, rstest};
use serde_json::json;

use wflow_plugin_protocol::messages::DeliverMessageResponse;

use super::*;
use crate::stub::tests::{MockPluginService, map};

/// Host broker stand-in recording handlers and counting cancellations.
#[derive(Default)]
struct FakeBroker {
    handlers: Mutex<Vec<(String, String, MessageHandler)>>,
    cancelled: Arc<AtomicUsize>,
}

impl FakeBroker {
    fn hook(self: &Arc<Self>) -> SubscribeFn {
        let broker = Arc::clone(self);
        Arc::new(move |name: &str, topic: &str, handler: MessageHandler| {
            broker
                .handlers
                .lock()
                .expect("lock")
                .push((name.to_owned(), topic.to_owned(), handler));
            let cancelled = Arc::clone(&broker.cancelled);
            let cancel: CancelFn = Box::new(move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            });
            Ok(cancel)
        })
    }

    fn handler(&self, index: usize) -> MessageHandler {
        let handlers = self.handlers.lock().expect("lock");
        Arc::clone(&handlers.get(index).expect("handler registered").2)
    }
}

#[fixture]
fn broker() -> Arc<FakeBroker> {
    Arc::new(FakeBroker::default())
}

fn server_with(broker: &Arc<FakeBroker>) -> CallbackServer {
    CallbackServer::new("echo", CallbackHooks::default().with_subscribe(broker.hook()))
}

#[test]
fn missing_hooks_produce_application_errors() {
    let server = CallbackServer::new("echo", CallbackHooks::default());
    assert!(server.trigger_workflow("http", "run", &ValueMap::new()).is_err());
    assert!(server.publish_message("h", "t", b"x", &Metadata::new()).is_err());
    assert!(server.subscribe("h", "", "t").is_err());
    assert!(!server.get_service("database"));
}

#[test]
fn trigger_workflow_forwards_to_the_hook() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let hooks = CallbackHooks::default().with_trigger(Arc::new(
        move |trigger_type: &str, action: &str, data: &ValueMap| {
            recorder.lock().expect("lock").push((
                trigger_type.to_owned(),
                action.to_owned(),
                data.clone(),
            ));
            Ok(())
        },
    ));
    let server = CallbackServer::new("echo", hooks);

    server
        .trigger_workflow("cron", "nightly", &map(json!({"at": "02:00"})))
        .expect("trigger");

    let seen = seen.lock().expect("lock");
    assert_eq!(
        seen.as_slice(),
        [("cron".to_owned(), "nightly".to_owned(), map(json!({"at": "02:00"})))]
    );
}

#[test]
fn service_lookup_and_publish_use_their_hooks() {
    let hooks = CallbackHooks::default()
        .with_service_lookup(Arc::new(|name: &str| name == "database"))
        .with_publish(Arc::new(|topic: &str, payload: &[u8], _: &Metadata| {
            Ok(format!("{topic}-{}", payload.len()))
        }));
    let server = CallbackServer::new("echo", hooks);

    assert!(server.get_service("database"));
    assert!(!server.get_service("cache"));
    assert_eq!(
        server.publish_message("h", "orders", b"abc", &Metadata::new()),
        Ok("orders-3".to_owned())
    );
}

#[rstest]
fn duplicate_subscriptions_are_rejected(broker: Arc<FakeBroker>) {
    let server = server_with(&broker);

    server.subscribe("h1", "", "orders").expect("first subscribe");
    let error = server.subscribe("h1", "", "orders").expect_err("duplicate");

    assert_eq!(error, "handle h1 is already subscribed to topic orders");
    assert_eq!(broker.handlers.lock().expect("lock").len(), 1);
    server.subscribe("h2", "", "orders").expect("other handle");
    assert_eq!(server.subscription_count(), 2);
}

/// Subscribe hook that reaches back into the server it is installed on.
fn reentrant_hook(
    slot: &Arc<OnceLock<Weak<CallbackServer>>>,
    cancelled: &Arc<AtomicUsize>,
    nested: impl Fn(&CallbackServer, &str) -> Result<(), String> + Send + Sync + 'static,
) -> SubscribeFn {
    let target = Arc::clone(slot);
    let counter = Arc::clone(cancelled);
    Arc::new(move |_broker: &str, topic: &str, _handler: MessageHandler| {
        if let Some(server) = target.get().and_then(Weak::upgrade) {
            nested(&server, topic)?;
        }
        let released = Arc::clone(&counter);
        let cancel: CancelFn = Box::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        });
        Ok(cancel)
    })
}

fn reentrant_server(hook: SubscribeFn, slot: &OnceLock<Weak<CallbackServer>>) -> Arc<CallbackServer> {
    let server = Arc::new(CallbackServer::new(
        "echo",
        CallbackHooks::default().with_subscribe(hook),
    ));
    slot.set(Arc::downgrade(&server)).expect("slot is empty");
    server
}

#[test]
fn subscribe_hooks_may_call_back_into_the_server() {
    let slot = Arc::default();
    let cancelled = Arc::default();
    let counts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&counts);
    let hook = reentrant_hook(&slot, &cancelled, move |server: &CallbackServer, topic: &str| {
        seen.lock().expect("lock").push(server.subscription_count());
        if topic == "outer" {
            server.subscribe("h1", "", "inner")?;
        }
        Ok(())
    });
    let server = reentrant_server(hook, &slot);

    server.subscribe("h1", "", "outer").expect("subscribe");

    assert_eq!(server.subscription_count(), 2);
    assert_eq!(*counts.lock().expect("lock"), [0, 0]);
    assert_eq!(
        server.subscribe("h1", "", "outer"),
        Err(String::from("handle h1 is already subscribed to topic outer"))
    );
}

#[test]
fn subscriptions_cancelled_during_setup_are_released() {
    let slot = Arc::default();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let hook = reentrant_hook(&slot, &cancelled, |server: &CallbackServer, _topic: &str| {
        server.cancel_all();
        Ok(())
    });
    let server = reentrant_server(hook, &slot);

    let error = server.subscribe("h1", "", "orders").expect_err("cancelled");

    assert_eq!(error, "subscription of handle h1 to topic orders was cancelled");
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(server.subscription_count(), 0);
}

#[test]
fn rejected_subscriptions_release_their_reservation() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let hook: SubscribeFn = Arc::new(move |_broker: &str, _topic: &str, _handler: MessageHandler| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(String::from("broker unavailable"));
        }
        let cancel: CancelFn = Box::new(|| {});
        Ok(cancel)
    });
    let server = CallbackServer::new("echo", CallbackHooks::default().with_subscribe(hook));

    let first = server.subscribe("h1", "", "orders");

    assert_eq!(first, Err(String::from("broker unavailable")));
    assert_eq!(server.subscription_count(), 0);
    server.subscribe("h1", "", "orders").expect("retry");
    assert_eq!(server.subscription_count(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[rstest]
fn unsubscribe_runs_the_cancel_function_once(broker: Arc<FakeBroker>) {
    let server = server_with(&broker);
    server.subscribe("h1", "", "orders").expect("subscribe");

    server.unsubscribe("h1", "orders").expect("unsubscribe");
    let error = server.unsubscribe("h1", "orders").expect_err("already gone");

    assert_eq!(error, "handle h1 is not subscribed to topic orders");
    assert_eq!(broker.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(server.subscription_count(), 0);
}

#[rstest]
fn cancel_all_releases_every_subscription(broker: Arc<FakeBroker>) {
    let server = server_with(&broker);
    server.subscribe("h1", "", "a").expect("subscribe a");
    server.subscribe("h1", "", "b").expect("subscribe b");

    server.cancel_all();

    assert_eq!(broker.cancelled.load(Ordering::SeqCst), 2);
    assert_eq!(server.subscription_count(), 0);
}

#[rstest]
fn delivered_messages_reach_the_plugin(broker: Arc<FakeBroker>) {
    let mut mock = MockPluginService::new();
    mock.expect_deliver_message()
        .withf(|delivery| {
            delivery.handle == "h1" && delivery.topic == "orders" && delivery.payload == b"{}"
        })
        .times(1)
        .returning(|_| {
            Ok(DeliverMessageResponse {
                acknowledged: true,
                error: String::new(),
            })
        });
    let plugin: Arc<dyn PluginService> = Arc::new(mock);
    let server = server_with(&broker);
    server.attach_plugin(&plugin);
    server.subscribe("h1", "", "orders").expect("subscribe");

    let handler = broker.handler(0);
    handler(b"{}", &Metadata::new()).expect("delivered");
}

#[rstest]
fn unacknowledged_deliveries_are_errors(broker: Arc<FakeBroker>) {
    let mut mock = MockPluginService::new();
    mock.expect_deliver_message()
        .returning(|_| Ok(DeliverMessageResponse::default()));
    let plugin: Arc<dyn PluginService> = Arc::new(mock);
    let server = server_with(&broker);
    server.attach_plugin(&plugin);
    server.subscribe("h1", "", "orders").expect("subscribe");

    let handler = broker.handler(0);
    assert!(handler(b"{}", &Metadata::new()).is_err());
}

#[rstest]
fn delivery_fails_once_the_plugin_is_gone(broker: Arc<FakeBroker>) {
    let plugin: Arc<dyn PluginService> = Arc::new(MockPluginService::new());
    let server = server_with(&broker);
    server.attach_plugin(&plugin);
    server.subscribe("h1", "", "orders").expect("subscribe");
    drop(plugin);

    let handler = broker.handler(0);
    assert_eq!(
        handler(b"{}", &Metadata::new()),
        Err("plugin is no longer running".to_owned())
    );
}

#[rstest]
fn rpc_surface_reports_application_errors_in_the_reply(broker: Arc<FakeBroker>) {
    let service = CallbackService::new(Arc::new(server_with(&broker)));
    let params = json!({"handle": "h1", "broker": "", "topic": "orders"});

    let first = service.call("Subscribe", params.clone()).expect("first call");
    let second = service.call("Subscribe", params).expect("second call");

    assert_eq!(first, json!({"error": ""}));
    assert_eq!(
        second,
        json!({"error": "handle h1 is already subscribed to topic orders"})
    );
}

#[test]
fn rpc_surface_faults_on_unknown_methods_and_bad_params() {
    let service = CallbackService::new(Arc::new(CallbackServer::new(
        "echo",
        CallbackHooks::default(),
    )));

    let unknown = service.call("Teleport", json!({})).expect_err("unknown");
    assert_eq!(unknown.code, FaultCode::UnknownMethod);

    let invalid = service.call("GetService", json!({"nom": 1})).expect_err("invalid");
    assert_eq!(invalid.code, FaultCode::InvalidParams);

    let found = service
        .call("GetService", json!({"name": "database"}))
        .expect("lookup");
    assert_eq!(found, json!({"found": false}));
}
