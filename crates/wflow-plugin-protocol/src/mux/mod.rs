//! Multiplexed request/response connection.
//!
//! A single socket carries any number of logical channels in both
//! directions. Each side registers [`Service`]s on channel ids and calls the
//! peer's services through [`ChannelClient`]s. A reader thread routes
//! responses to waiting callers and dispatches incoming requests on their own
//! threads, so a service may call back into the peer while handling a
//! request.
//!
//! When the socket reaches end of file, fails, or is closed locally, every
//! outstanding call fails with [`RpcError::Closed`] and later calls fail
//! immediately.

mod broker;

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use broker::Broker;

use crate::error::RpcError;
use crate::stream::Stream;
use crate::wire::{Fault, FaultCode, Frame};

const MUX_TARGET: &str = "wflow_plugin_protocol::mux";

/// Handles requests arriving on one channel.
pub trait Service: Send + Sync {
    /// Handles `method` with raw JSON `params`.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] when the call cannot be carried out. Application
    /// failures belong in the reply payload instead.
    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Fault>;
}

/// Which end of the connection this is. Determines channel id parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The process that launched the plugin.
    Host,
    /// The plugin process.
    Plugin,
}

impl Role {
    const fn first_channel(self) -> u32 {
        match self {
            Self::Host => 1,
            Self::Plugin => 2,
        }
    }
}

enum Outcome {
    Reply(serde_json::Value),
    Fault(Fault),
    Closed,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Sender<Outcome>>,
}

struct Shared {
    label: String,
    writer: Mutex<Stream>,
    control: Stream,
    pending: Mutex<Pending>,
    closed_signal: Condvar,
    services: RwLock<HashMap<u32, Arc<dyn Service>>>,
    next_request: AtomicU64,
    next_channel: AtomicU32,
}

/// One end of a multiplexed connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.shared.label)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Takes ownership of `stream` and starts the reader thread.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be cloned or the thread cannot start.
    pub fn start(stream: Stream, role: Role, label: impl Into<String>) -> std::io::Result<Self> {
        let label = label.into();
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let shared = Arc::new(Shared {
            label: label.clone(),
            writer: Mutex::new(stream),
            control,
            pending: Mutex::new(Pending::default()),
            closed_signal: Condvar::new(),
            services: RwLock::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            next_channel: AtomicU32::new(role.first_channel()),
        });
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("wflow-mux-{label}"))
            .spawn(move || read_loop(&reader_shared, reader))?;
        Ok(Self { shared })
    }

    /// Registers `service` to answer requests on `channel`.
    pub fn serve(&self, channel: u32, service: Arc<dyn Service>) {
        self.shared
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, service);
    }

    /// Returns a client for the peer's service on `channel`.
    #[must_use]
    pub fn channel(&self, channel: u32) -> ChannelClient {
        ChannelClient {
            connection: self.clone(),
            channel,
        }
    }

    /// Calls `method` on the peer's `channel` and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Closed`] when the connection is or becomes closed,
    /// [`RpcError::Fault`] when the peer reports a fault, and
    /// [`RpcError::Io`] when the request cannot be written.
    pub fn call(
        &self,
        channel: u32,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        {
            let mut pending = self.shared.lock_pending();
            if pending.closed {
                return Err(RpcError::Closed);
            }
            pending.waiters.insert(id, sender);
        }

        let frame = Frame::Request {
            channel,
            id,
            method: method.to_owned(),
            params,
        };
        if let Err(error) = self.shared.write(method, &frame) {
            self.shared.lock_pending().waiters.remove(&id);
            return Err(error);
        }

        match receiver.recv() {
            Ok(Outcome::Reply(value)) => Ok(value),
            Ok(Outcome::Fault(fault)) => Err(RpcError::Fault {
                method: method.to_owned(),
                fault,
            }),
            Ok(Outcome::Closed) | Err(_) => Err(RpcError::Closed),
        }
    }

    /// Closes the connection, failing every outstanding call.
    ///
    /// Registered services are dropped so that services holding clients of
    /// this connection do not keep it alive.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock_pending().closed
    }

    /// Blocks until the connection closes.
    pub fn wait_closed(&self) {
        let mut pending = self.shared.lock_pending();
        while !pending.closed {
            pending = self
                .shared
                .closed_signal
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn allocate_channel(&self) -> u32 {
        self.shared.next_channel.fetch_add(2, Ordering::Relaxed)
    }
}

/// Typed client for one channel of the peer.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    connection: Connection,
    channel: u32,
}

impl ChannelClient {
    /// Channel id this client targets.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.channel
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Serialises `params`, performs the call and deserialises the reply.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] describing the transport failure.
    pub fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = serde_json::to_value(params).map_err(|source| RpcError::Encode {
            method: method.to_owned(),
            source: Arc::new(source),
        })?;
        let reply = self.connection.call(self.channel, method, value)?;
        serde_json::from_value(reply).map_err(|source| RpcError::Decode {
            method: method.to_owned(),
            source: Arc::new(source),
        })
    }
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, method: &str, frame: &Frame) -> Result<(), RpcError> {
        let mut line = serde_json::to_vec(frame).map_err(|source| RpcError::Encode {
            method: method.to_owned(),
            source: Arc::new(source),
        })?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(&line)
            .and_then(|()| writer.flush())
            .map_err(RpcError::io)
    }

    fn close(&self) {
        let waiters = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        for (_, waiter) in waiters {
            drop(waiter.send(Outcome::Closed));
        }
        self.closed_signal.notify_all();
        if let Err(error) = self.control.shutdown() {
            debug!(target: MUX_TARGET, connection = %self.label, %error, "socket already shut down");
        }
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn complete(&self, id: u64, outcome: Outcome) {
        let waiter = self.lock_pending().waiters.remove(&id);
        match waiter {
            Some(waiter) => drop(waiter.send(outcome)),
            None => debug!(
                target: MUX_TARGET,
                connection = %self.label,
                id,
                "discarding response for unknown request"
            ),
        }
    }
}

fn read_loop(shared: &Arc<Shared>, stream: Stream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(target: MUX_TARGET, connection = %shared.label, %error, "read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Frame>(trimmed) {
            Ok(Frame::Response {
                id, result, fault, ..
            }) => {
                let outcome = match fault {
                    Some(fault) => Outcome::Fault(fault),
                    None => Outcome::Reply(result.unwrap_or(serde_json::Value::Null)),
                };
                shared.complete(id, outcome);
            }
            Ok(Frame::Request {
                channel,
                id,
                method,
                params,
            }) => dispatch(shared, channel, id, method, params),
            Err(error) => warn!(
                target: MUX_TARGET,
                connection = %shared.label,
                %error,
                "discarding malformed frame"
            ),
        }
    }
    debug!(target: MUX_TARGET, connection = %shared.label, "connection reached end of stream");
    shared.close();
}

fn dispatch(
    shared: &Arc<Shared>,
    channel: u32,
    id: u64,
    method: String,
    params: serde_json::Value,
) {
    let service = shared
        .services
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&channel)
        .cloned();
    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("wflow-mux-{}-{channel}", shared.label))
        .spawn(move || {
            let outcome = match service {
                Some(service) => service.call(&method, params),
                None => Err(Fault::new(
                    FaultCode::UnknownChannel,
                    format!("no service on channel {channel}"),
                )),
            };
            let frame = match outcome {
                Ok(result) => Frame::Response {
                    channel,
                    id,
                    result: Some(result),
                    fault: None,
                },
                Err(fault) => Frame::Response {
                    channel,
                    id,
                    result: None,
                    fault: Some(fault),
                },
            };
            if let Err(error) = worker.write(&method, &frame) {
                debug!(
                    target: MUX_TARGET,
                    connection = %worker.label,
                    method = %method,
                    %error,
                    "failed to send response"
                );
            }
        });
    if let Err(error) = spawned {
        warn!(target: MUX_TARGET, connection = %shared.label, %error, "failed to spawn request worker");
    }
}
