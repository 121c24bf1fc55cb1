//! Host services a plugin can call back into.
//!
//! The [`CallbackServer`] answers requests arriving on the callback channel
//! the host serves for each plugin. Every operation delegates to an optional
//! host hook supplied through [`CallbackHooks`]; absent hooks produce an
//! application error (or "not found" for service lookups) instead of a
//! transport failure.
//!
//! Subscriptions are tracked per `(handle, topic)` so a module cannot
//! subscribe twice to the same topic and unsubscribing runs the cancel
//! function the host broker returned.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tracing::{debug, error, info, warn};

use wflow_plugin_protocol::messages::{
    Empty, ErrorResponse, GetServiceRequest, GetServiceResponse, LogLevel, LogRequest,
    PublishMessageRequest, PublishMessageResponse, SubscribeRequest, TriggerWorkflowRequest,
    UnsubscribeRequest, callback_method,
};
use wflow_plugin_protocol::value::decode_map;
use wflow_plugin_protocol::wire::{self, Fault, FaultCode};
use wflow_plugin_protocol::Service;

use crate::engine::ValueMap;
use crate::stub::{Delivery, PluginService};

const CALLBACK_TARGET: &str = "wflow_plugins::callback";

/// Target used for log lines emitted by plugins.
pub const PLUGIN_LOG_TARGET: &str = "wflow_plugins::plugin_log";

/// Message metadata.
pub type Metadata = BTreeMap<String, String>;

/// Starts a workflow: `(trigger_type, action, data)`.
pub type TriggerFn = Arc<dyn Fn(&str, &str, &ValueMap) -> Result<(), String> + Send + Sync>;

/// Reports whether a named host service exists.
pub type ServiceLookupFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Publishes a message and returns its id: `(topic, payload, metadata)`.
pub type PublishFn = Arc<dyn Fn(&str, &[u8], &Metadata) -> Result<String, String> + Send + Sync>;

/// Receives messages for one subscription.
pub type MessageHandler = Arc<dyn Fn(&[u8], &Metadata) -> Result<(), String> + Send + Sync>;

/// Cancels a subscription registered with the host broker.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Registers `handler` for `(broker, topic)` and returns its cancel function.
pub type SubscribeFn =
    Arc<dyn Fn(&str, &str, MessageHandler) -> Result<CancelFn, String> + Send + Sync>;

/// Host hooks backing the callback operations.
#[derive(Clone, Default)]
pub struct CallbackHooks {
    trigger: Option<TriggerFn>,
    service_lookup: Option<ServiceLookupFn>,
    publish: Option<PublishFn>,
    subscribe: Option<SubscribeFn>,
}

impl fmt::Debug for CallbackHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHooks")
            .field("trigger", &self.trigger.is_some())
            .field("service_lookup", &self.service_lookup.is_some())
            .field("publish", &self.publish.is_some())
            .field("subscribe", &self.subscribe.is_some())
            .finish()
    }
}

impl CallbackHooks {
    /// Sets the workflow trigger hook.
    #[must_use]
    pub fn with_trigger(mut self, hook: TriggerFn) -> Self {
        self.trigger = Some(hook);
        self
    }

    /// Sets the service lookup hook.
    #[must_use]
    pub fn with_service_lookup(mut self, hook: ServiceLookupFn) -> Self {
        self.service_lookup = Some(hook);
        self
    }

    /// Sets the publish hook.
    #[must_use]
    pub fn with_publish(mut self, hook: PublishFn) -> Self {
        self.publish = Some(hook);
        self
    }

    /// Sets the subscribe hook.
    #[must_use]
    pub fn with_subscribe(mut self, hook: SubscribeFn) -> Self {
        self.subscribe = Some(hook);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    handle: String,
    topic: String,
}

/// Per-plugin callback endpoint.
pub struct CallbackServer {
    plugin: String,
    hooks: CallbackHooks,
    deliverer: OnceLock<Weak<dyn PluginService>>,
    /// `None` marks a subscription whose host hook has not returned yet.
    subscriptions: Mutex<HashMap<SubscriptionKey, Option<CancelFn>>>,
}

impl fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackServer")
            .field("plugin", &self.plugin)
            .field("hooks", &self.hooks)
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl CallbackServer {
    /// Creates a server for `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, hooks: CallbackHooks) -> Self {
        Self {
            plugin: plugin.into(),
            hooks,
            deliverer: OnceLock::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the plugin service that receives subscribed messages.
    ///
    /// Only the first call has an effect. The service is held weakly so a
    /// lingering subscription never keeps an unloaded plugin alive.
    pub fn attach_plugin(&self, plugin: &Arc<dyn PluginService>) {
        if self.deliverer.set(Arc::downgrade(plugin)).is_err() {
            debug!(target: CALLBACK_TARGET, plugin = %self.plugin, "delivery target already attached");
        }
    }

    /// Asks the host to start a workflow.
    ///
    /// # Errors
    ///
    /// Returns the hook's error, or an error when no hook is configured.
    pub fn trigger_workflow(
        &self,
        trigger_type: &str,
        action: &str,
        data: &ValueMap,
    ) -> Result<(), String> {
        let Some(trigger) = &self.hooks.trigger else {
            return Err(String::from("workflow triggering is not available"));
        };
        debug!(
            target: CALLBACK_TARGET,
            plugin = %self.plugin,
            trigger_type,
            action,
            "plugin requested workflow"
        );
        trigger(trigger_type, action, data)
    }

    /// Whether the host has a service called `name`.
    #[must_use]
    pub fn get_service(&self, name: &str) -> bool {
        self.hooks
            .service_lookup
            .as_ref()
            .is_some_and(|lookup| lookup(name))
    }

    /// Emits a log line on behalf of the plugin.
    pub fn log(&self, level: LogLevel, message: &str, fields: &Metadata) {
        let plugin = self.plugin.as_str();
        let rendered = fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            LogLevel::Debug => debug!(target: PLUGIN_LOG_TARGET, plugin, fields = %rendered, "{message}"),
            LogLevel::Info => info!(target: PLUGIN_LOG_TARGET, plugin, fields = %rendered, "{message}"),
            LogLevel::Warn => warn!(target: PLUGIN_LOG_TARGET, plugin, fields = %rendered, "{message}"),
            LogLevel::Error => error!(target: PLUGIN_LOG_TARGET, plugin, fields = %rendered, "{message}"),
        }
    }

    /// Publishes a message for module `handle`.
    ///
    /// # Errors
    ///
    /// Returns the hook's error, or an error when no hook is configured.
    pub fn publish_message(
        &self,
        handle: &str,
        topic: &str,
        payload: &[u8],
        metadata: &Metadata,
    ) -> Result<String, String> {
        let Some(publish) = &self.hooks.publish else {
            return Err(String::from("message publishing is not available"));
        };
        debug!(target: CALLBACK_TARGET, plugin = %self.plugin, handle, topic, "publishing message");
        publish(topic, payload, metadata)
    }

    /// Subscribes module `handle` to `topic` on `broker`.
    ///
    /// Messages are forwarded to the plugin through `DeliverMessage`.
    ///
    /// # Errors
    ///
    /// Fails when the pair is already subscribed, no hook is configured, or
    /// the hook rejects the subscription.
    pub fn subscribe(&self, handle: &str, broker: &str, topic: &str) -> Result<(), String> {
        let Some(subscribe) = &self.hooks.subscribe else {
            return Err(String::from("message subscription is not available"));
        };
        let key = SubscriptionKey {
            handle: handle.to_owned(),
            topic: topic.to_owned(),
        };
        {
            let mut subscriptions = self.lock_subscriptions();
            if subscriptions.contains_key(&key) {
                return Err(format!("handle {handle} is already subscribed to topic {topic}"));
            }
            subscriptions.insert(key.clone(), None);
        }

        // Unlocked: the hook may call back into this server.
        let outcome = subscribe(broker, topic, self.delivery_handler(handle, topic));

        let mut subscriptions = self.lock_subscriptions();
        let reserved = matches!(subscriptions.get(&key), Some(None));
        match outcome {
            Ok(cancel) if reserved => {
                subscriptions.insert(key, Some(cancel));
            }
            Ok(cancel) => {
                drop(subscriptions);
                cancel();
                return Err(format!(
                    "subscription of handle {handle} to topic {topic} was cancelled"
                ));
            }
            Err(error) => {
                if reserved {
                    subscriptions.remove(&key);
                }
                return Err(error);
            }
        }
        drop(subscriptions);
        debug!(target: CALLBACK_TARGET, plugin = %self.plugin, handle, topic, "subscribed");
        Ok(())
    }

    /// Cancels the subscription of `handle` to `topic`.
    ///
    /// # Errors
    ///
    /// Fails when no such subscription exists.
    pub fn unsubscribe(&self, handle: &str, topic: &str) -> Result<(), String> {
        let key = SubscriptionKey {
            handle: handle.to_owned(),
            topic: topic.to_owned(),
        };
        let cancel = {
            let mut subscriptions = self.lock_subscriptions();
            if matches!(subscriptions.get(&key), Some(Some(_))) {
                subscriptions.remove(&key).flatten()
            } else {
                None
            }
        };
        let Some(cancel) = cancel else {
            return Err(format!("handle {handle} is not subscribed to topic {topic}"));
        };
        cancel();
        debug!(target: CALLBACK_TARGET, plugin = %self.plugin, handle, topic, "unsubscribed");
        Ok(())
    }

    /// Cancels every subscription. Called when the plugin is killed.
    ///
    /// Subscriptions still being set up are cancelled once their hook
    /// returns.
    pub fn cancel_all(&self) {
        let drained: Vec<CancelFn> = self
            .lock_subscriptions()
            .drain()
            .filter_map(|(_, cancel)| cancel)
            .collect();
        for cancel in drained {
            cancel();
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions()
            .values()
            .filter(|cancel| cancel.is_some())
            .count()
    }

    fn lock_subscriptions(
        &self,
    ) -> MutexGuard<'_, HashMap<SubscriptionKey, Option<CancelFn>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery_handler(&self, handle: &str, topic: &str) -> MessageHandler {
        let target = self.deliverer.get().cloned();
        let handle = handle.to_owned();
        let topic = topic.to_owned();
        Arc::new(move |payload: &[u8], metadata: &Metadata| {
            let Some(plugin) = target.as_ref().and_then(Weak::upgrade) else {
                return Err(String::from("plugin is no longer running"));
            };
            let reply = plugin
                .deliver_message(&Delivery {
                    handle: handle.clone(),
                    topic: topic.clone(),
                    payload: payload.to_vec(),
                    metadata: metadata.clone(),
                })
                .map_err(|error| error.to_string())?;
            if !reply.error.is_empty() {
                return Err(reply.error);
            }
            if reply.acknowledged {
                Ok(())
            } else {
                Err(format!("no handler acknowledged the message on {topic}"))
            }
        })
    }
}

/// Exposes a [`CallbackServer`] on a connection channel.
#[derive(Debug, Clone)]
pub struct CallbackService {
    server: Arc<CallbackServer>,
}

impl CallbackService {
    /// Wraps `server`.
    #[must_use]
    pub const fn new(server: Arc<CallbackServer>) -> Self {
        Self { server }
    }
}

fn outcome(result: Result<(), String>) -> ErrorResponse {
    result.map_or_else(ErrorResponse::failed, |()| ErrorResponse::ok())
}

impl Service for CallbackService {
    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Fault> {
        let server = &self.server;
        match method {
            callback_method::TRIGGER_WORKFLOW => {
                let request: TriggerWorkflowRequest = wire::params(method, params)?;
                let data = decode_map(&request.data)
                    .map_err(|error| Fault::new(FaultCode::InvalidParams, error.to_string()))?;
                wire::reply(&outcome(server.trigger_workflow(
                    &request.trigger_type,
                    &request.action,
                    &data,
                )))
            }
            callback_method::GET_SERVICE => {
                let request: GetServiceRequest = wire::params(method, params)?;
                wire::reply(&GetServiceResponse {
                    found: server.get_service(&request.name),
                })
            }
            callback_method::LOG => {
                let request: LogRequest = wire::params(method, params)?;
                server.log(request.level, &request.message, &request.fields);
                wire::reply(&Empty {})
            }
            callback_method::PUBLISH_MESSAGE => {
                let request: PublishMessageRequest = wire::params(method, params)?;
                let response = match server.publish_message(
                    &request.handle,
                    &request.topic,
                    &request.payload,
                    &request.metadata,
                ) {
                    Ok(message_id) => PublishMessageResponse {
                        message_id,
                        error: String::new(),
                    },
                    Err(error) => PublishMessageResponse {
                        message_id: String::new(),
                        error,
                    },
                };
                wire::reply(&response)
            }
            callback_method::SUBSCRIBE => {
                let request: SubscribeRequest = wire::params(method, params)?;
                wire::reply(&outcome(server.subscribe(
                    &request.handle,
                    &request.broker,
                    &request.topic,
                )))
            }
            callback_method::UNSUBSCRIBE => {
                let request: UnsubscribeRequest = wire::params(method, params)?;
                wire::reply(&outcome(server.unsubscribe(&request.handle, &request.topic)))
            }
            other => Err(Fault::unknown_method(other)),
        }
    }
}

#[cfg(test)]
mod tests;
