//! Calls from the plugin back into the host.
//!
//! [`HostClient`] wraps the callback channel the host announces in its
//! `Connect` request. [`Messenger`] binds that client to one module handle
//! and keeps the local handlers that `DeliverMessage` requests are routed
//! to.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use wflow_plugin_protocol::messages::{
    Empty, ErrorResponse, GetServiceRequest, GetServiceResponse, LogLevel, LogRequest,
    PublishMessageRequest, PublishMessageResponse, SubscribeRequest, TriggerWorkflowRequest,
    UnsubscribeRequest, callback_method,
};
use wflow_plugin_protocol::value::encode_map;
use wflow_plugin_protocol::{ChannelClient, RpcError, ValueMap};

use crate::error::SdkError;

/// Message metadata.
pub type Metadata = BTreeMap<String, String>;

/// Receives messages for one `(handle, topic)` subscription.
pub type MessageHandler = Arc<dyn Fn(&[u8], &Metadata) -> Result<(), String> + Send + Sync>;

/// Local handlers keyed by `(handle, topic)`.
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: Mutex<HashMap<(String, String), MessageHandler>>,
}

impl HandlerTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), MessageHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, handle: &str, topic: &str) -> Option<MessageHandler> {
        self.lock()
            .get(&(handle.to_owned(), topic.to_owned()))
            .cloned()
    }

    fn insert(&self, handle: &str, topic: &str, handler: MessageHandler) -> bool {
        let key = (handle.to_owned(), topic.to_owned());
        let mut handlers = self.lock();
        if handlers.contains_key(&key) {
            return false;
        }
        handlers.insert(key, handler);
        true
    }

    fn remove(&self, handle: &str, topic: &str) {
        self.lock().remove(&(handle.to_owned(), topic.to_owned()));
    }

    /// Drops every handler registered for `handle`.
    pub(crate) fn remove_handle(&self, handle: &str) {
        self.lock().retain(|(owner, _), _| owner != handle);
    }
}

/// Client for the host's callback service.
#[derive(Debug, Clone)]
pub struct HostClient {
    channel: ChannelClient,
}

impl HostClient {
    pub(crate) const fn new(channel: ChannelClient) -> Self {
        Self { channel }
    }

    /// Asks the host to start the workflow bound to `action`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Callback`] when the call fails and
    /// [`SdkError::Rejected`] when the host refuses.
    pub fn trigger_workflow(
        &self,
        trigger_type: &str,
        action: &str,
        data: &ValueMap,
    ) -> Result<(), SdkError> {
        const OPERATION: &str = callback_method::TRIGGER_WORKFLOW;
        let data = encode_map(data)
            .map_err(|error| SdkError::callback(OPERATION, RpcError::from(error)))?;
        let request = TriggerWorkflowRequest {
            trigger_type: trigger_type.to_owned(),
            action: action.to_owned(),
            data,
        };
        let response: ErrorResponse = self
            .channel
            .call(OPERATION, &request)
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        SdkError::check(OPERATION, response.error)
    }

    /// Whether the host exposes a service called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Callback`] when the call fails.
    pub fn get_service(&self, name: &str) -> Result<bool, SdkError> {
        const OPERATION: &str = callback_method::GET_SERVICE;
        let response: GetServiceResponse = self
            .channel
            .call(
                OPERATION,
                &GetServiceRequest {
                    name: name.to_owned(),
                },
            )
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        Ok(response.found)
    }

    /// Writes a line to the host's log.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Callback`] when the call fails.
    pub fn log(&self, level: LogLevel, message: &str, fields: &Metadata) -> Result<(), SdkError> {
        const OPERATION: &str = callback_method::LOG;
        let request = LogRequest {
            level,
            message: message.to_owned(),
            fields: fields.clone(),
        };
        let _: Empty = self
            .channel
            .call(OPERATION, &request)
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        Ok(())
    }

    fn publish(
        &self,
        handle: &str,
        topic: &str,
        payload: &[u8],
        metadata: &Metadata,
    ) -> Result<String, SdkError> {
        const OPERATION: &str = callback_method::PUBLISH_MESSAGE;
        let request = PublishMessageRequest {
            handle: handle.to_owned(),
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            metadata: metadata.clone(),
        };
        let response: PublishMessageResponse = self
            .channel
            .call(OPERATION, &request)
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        SdkError::check(OPERATION, response.error)?;
        Ok(response.message_id)
    }

    fn subscribe(&self, handle: &str, topic: &str) -> Result<(), SdkError> {
        const OPERATION: &str = callback_method::SUBSCRIBE;
        let request = SubscribeRequest {
            handle: handle.to_owned(),
            broker: String::new(),
            topic: topic.to_owned(),
        };
        let response: ErrorResponse = self
            .channel
            .call(OPERATION, &request)
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        SdkError::check(OPERATION, response.error)
    }

    fn unsubscribe(&self, handle: &str, topic: &str) -> Result<(), SdkError> {
        const OPERATION: &str = callback_method::UNSUBSCRIBE;
        let request = UnsubscribeRequest {
            handle: handle.to_owned(),
            topic: topic.to_owned(),
        };
        let response: ErrorResponse = self
            .channel
            .call(OPERATION, &request)
            .map_err(|source| SdkError::callback(OPERATION, source))?;
        SdkError::check(OPERATION, response.error)
    }
}

/// Publish and subscribe on behalf of one module handle.
#[derive(Clone)]
pub struct Messenger {
    handle: String,
    host: Arc<OnceLock<HostClient>>,
    handlers: Arc<HandlerTable>,
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("handle", &self.handle)
            .field("connected", &self.host.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Messenger {
    pub(crate) const fn new(
        handle: String,
        host: Arc<OnceLock<HostClient>>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        Self {
            handle,
            host,
            handlers,
        }
    }

    /// Handle this messenger acts for.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Client for the other host callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::NotConnected`] before the host has connected.
    pub fn host(&self) -> Result<&HostClient, SdkError> {
        self.host.get().ok_or(SdkError::NotConnected)
    }

    /// Publishes `payload` on `topic` and returns the broker's message id.
    ///
    /// # Errors
    ///
    /// Returns an [`SdkError`] when the call fails or the host refuses.
    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        metadata: &Metadata,
    ) -> Result<String, SdkError> {
        self.host()?.publish(&self.handle, topic, payload, metadata)
    }

    /// Routes messages on `topic` to `handler`.
    ///
    /// The handler is registered before the host is asked, so a message
    /// delivered while the call is in flight still finds it.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Rejected`] when this handle already follows
    /// `topic`, or the host's error.
    pub fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), SdkError> {
        let host = self.host()?;
        if !self.handlers.insert(&self.handle, topic, handler) {
            return Err(SdkError::Rejected {
                operation: callback_method::SUBSCRIBE,
                message: format!("handle {} is already subscribed to topic {topic}", self.handle),
            });
        }
        host.subscribe(&self.handle, topic).inspect_err(|_| {
            self.handlers.remove(&self.handle, topic);
        })
    }

    /// Stops following `topic`.
    ///
    /// # Errors
    ///
    /// Returns the host's error when the handle was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> Result<(), SdkError> {
        self.host()?.unsubscribe(&self.handle, topic)?;
        self.handlers.remove(&self.handle, topic);
        Ok(())
    }
}
