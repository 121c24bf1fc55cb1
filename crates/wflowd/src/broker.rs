//! In-process message broker backing the plugin publish and subscribe
//! callbacks.
//!
//! Delivery is synchronous: `publish` runs every handler for the topic on
//! the caller's thread before returning. A failing handler is logged and
//! does not stop delivery to the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};
use uuid::Uuid;

use wflow_plugins::{CallbackHooks, CancelFn, MessageHandler, Metadata, ValueMap};

const BROKER_TARGET: &str = "wflowd::broker";

/// Name plugins may pass to select this broker. The empty name does too.
pub const DEFAULT_BROKER: &str = "default";

/// Host service names reported as present to plugins.
pub const HOST_SERVICES: &[&str] = &[DEFAULT_BROKER];

struct Subscription {
    id: u64,
    handler: MessageHandler,
}

/// Topic-keyed fan-out of plugin messages.
#[derive(Default)]
pub struct MessageBroker {
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker")
            .field("topics", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl MessageBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers `payload` to every subscriber of `topic` and returns the
    /// message id.
    #[must_use]
    pub fn publish(&self, topic: &str, payload: &[u8], metadata: &Metadata) -> String {
        let message_id = Uuid::new_v4().to_string();
        let handlers: Vec<MessageHandler> = self
            .lock()
            .get(topic)
            .map(|subs| subs.iter().map(|sub| Arc::clone(&sub.handler)).collect())
            .unwrap_or_default();
        debug!(
            target: BROKER_TARGET,
            topic,
            message_id = %message_id,
            subscribers = handlers.len(),
            "publishing message"
        );
        for handler in handlers {
            if let Err(error) = handler(payload, metadata) {
                warn!(
                    target: BROKER_TARGET,
                    topic,
                    message_id = %message_id,
                    %error,
                    "subscriber rejected message"
                );
            }
        }
        message_id
    }

    /// Registers `handler` for `topic` on the named broker.
    ///
    /// # Errors
    ///
    /// Returns an error naming the broker when it is not this one.
    pub fn subscribe(
        self: &Arc<Self>,
        broker: &str,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<CancelFn, String> {
        if !broker.is_empty() && broker != DEFAULT_BROKER {
            return Err(format!("unknown message broker: {broker}"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscription { id, handler });

        let weak: Weak<Self> = Arc::downgrade(self);
        let topic = topic.to_owned();
        Ok(Box::new(move || {
            if let Some(broker) = weak.upgrade() {
                broker.remove(&topic, id);
            }
        }))
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    /// Callback hooks wiring plugins to this broker.
    #[must_use]
    pub fn hooks(self: &Arc<Self>) -> CallbackHooks {
        let publisher = Arc::clone(self);
        let subscriber = Arc::clone(self);
        CallbackHooks::default()
            .with_publish(Arc::new(
                move |topic: &str, payload: &[u8], metadata: &Metadata| {
                    Ok(publisher.publish(topic, payload, metadata))
                },
            ))
            .with_subscribe(Arc::new(
                move |broker: &str, topic: &str, handler: MessageHandler| {
                    subscriber.subscribe(broker, topic, handler)
                },
            ))
            .with_service_lookup(Arc::new(|name: &str| HOST_SERVICES.contains(&name)))
            .with_trigger(Arc::new(
                |trigger_type: &str, action: &str, data: &ValueMap| {
                    // No pipeline engine runs in the daemon; record the request.
                    info!(
                        target: BROKER_TARGET,
                        trigger_type,
                        action,
                        fields = data.len(),
                        "workflow trigger received"
                    );
                    Ok(())
                },
            ))
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut topics = self.lock();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|sub| sub.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, MessageHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |payload: &[u8], _: &Metadata| {
            sink.lock()
                .expect("lock")
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn publishes_to_every_subscriber() {
        let broker = MessageBroker::new();
        let (first, first_handler) = recorder();
        let (second, second_handler) = recorder();
        let failing: MessageHandler =
            Arc::new(|_: &[u8], _: &Metadata| Err(String::from("boom")));
        let _a = broker.subscribe("", "orders", first_handler).expect("subscribe");
        let _b = broker.subscribe("", "orders", failing).expect("subscribe");
        let _c = broker
            .subscribe(DEFAULT_BROKER, "orders", second_handler)
            .expect("subscribe");

        let id = broker.publish("orders", b"order-1", &Metadata::new());

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(*first.lock().expect("lock"), ["order-1"]);
        assert_eq!(*second.lock().expect("lock"), ["order-1"]);
    }

    #[test]
    fn cancelling_stops_delivery() {
        let broker = MessageBroker::new();
        let (seen, handler) = recorder();
        let cancel = broker.subscribe("", "orders", handler).expect("subscribe");

        cancel();
        drop(broker.publish("orders", b"late", &Metadata::new()));

        assert!(seen.lock().expect("lock").is_empty());
        assert_eq!(broker.subscriber_count("orders"), 0);
    }

    #[rstest]
    #[case("kafka")]
    #[case("nats")]
    fn foreign_brokers_are_rejected(#[case] name: &str) {
        let broker = MessageBroker::new();
        let (_, handler) = recorder();

        let error = broker.subscribe(name, "orders", handler).err();

        assert_eq!(error, Some(format!("unknown message broker: {name}")));
    }
}
