//! `RealtimeStore` over the cursorcast websocket.
//!
//! DESIGN
//! ======
//! One socket, split in two tasks:
//! - writer: drains an mpsc of outbound messages into the sink
//! - reader: decodes inbound frames and routes them
//!   - terminal replies → the oneshot registered under the request id
//!   - `store:changed` items → the watch channel of the subscription whose
//!     subscribe request id is the item's `parent_id`
//!
//! Dropping the store aborts both tasks, which drops the socket without a
//! close handshake. The server treats that like any vanished participant
//! and runs the registered disconnect removals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use frames::{Frame, Status};
use futures_util::{SinkExt, StreamExt};
use presence::record::now_ms;
use presence::store::{RealtimeStore, StoreError, Subscription};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::CliError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Frame>>>>;
type Watchers = Arc<Mutex<HashMap<String, watch::Sender<Value>>>>;

pub struct RemoteStore {
    connection_id: Option<u64>,
    outbound: mpsc::Sender<Message>,
    pending: Pending,
    watchers: Watchers,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RemoteStore {
    /// Connect to `ws_url` and wait for `session:connected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or the server never
    /// greets us.
    pub async fn connect(ws_url: &str) -> Result<Self, CliError> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|error| CliError::WsConnect(Box::new(error)))?;
        let (mut sink, mut stream) = stream.split();

        let welcome = tokio::time::timeout(REQUEST_TIMEOUT, async {
            loop {
                let Some(message) = stream.next().await else {
                    return Err(CliError::WsClosed);
                };
                if let Message::Binary(bytes) = message.map_err(|error| CliError::WsConnect(Box::new(error)))? {
                    let frame = frames::decode_frame(&bytes)?;
                    if frame.syscall == "session:connected" {
                        return Ok(frame);
                    }
                }
            }
        })
        .await
        .map_err(|_| CliError::Timeout)??;
        let connection_id = welcome.data.get("connection_id").and_then(id_from_number);

        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(256);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let pending: Pending = Arc::default();
        let watchers: Watchers = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&pending),
            Arc::clone(&watchers),
            Arc::clone(&closed),
        ));

        debug!(?connection_id, "remote: connected");
        Ok(Self { connection_id, outbound, pending, watchers, closed, reader, writer })
    }

    /// Server-assigned connection id, if the greeting carried one.
    pub fn connection_id(&self) -> Option<u64> {
        self.connection_id
    }

    /// Send a request and wait for its terminal reply.
    async fn request(&self, syscall: &str, data: Value) -> Result<Frame, StoreError> {
        self.send_and_wait(request_frame(syscall, data)).await
    }

    async fn send_and_wait(&self, frame: Frame) -> Result<Frame, StoreError> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(frame.id.clone(), tx);
        // The reader flags before clearing, so a late insert still sees it.
        if self.closed.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&frame.id);
            return Err(StoreError::Closed);
        }

        let bytes = frames::encode_frame(&frame);
        if self.outbound.send(Message::Binary(bytes.into())).await.is_err() {
            lock(&self.pending).remove(&frame.id);
            return Err(StoreError::Closed);
        }

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(StoreError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&frame.id);
                return Err(StoreError::Timeout);
            }
        };
        if reply.status == Status::Error {
            return Err(rejected(&reply));
        }
        Ok(reply)
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl RealtimeStore for RemoteStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.request("store:set", json!({"path": path, "value": value}))
            .await
            .map(|_| ())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.request("store:remove", json!({"path": path}))
            .await
            .map(|_| ())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let frame = request_frame("store:subscribe", json!({"path": path}));
        let request_id = frame.id.clone();

        // Register before sending: the first snapshot can race the done reply.
        let (tx, rx) = watch::channel(Value::Null);
        lock(&self.watchers).insert(request_id.clone(), tx);

        let reply = match self.send_and_wait(frame).await {
            Ok(reply) => reply,
            Err(e) => {
                lock(&self.watchers).remove(&request_id);
                return Err(e);
            }
        };

        let subscription_id = reply
            .data
            .get("subscription_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let watchers = Arc::clone(&self.watchers);
        let outbound = self.outbound.clone();
        Ok(Subscription::new(rx).with_cancel(move || {
            lock(&watchers).remove(&request_id);
            let unsubscribe = request_frame("store:unsubscribe", json!({"subscription_id": subscription_id}));
            // Best effort: if the socket is gone the subscription is gone too.
            let _ = outbound.try_send(Message::Binary(frames::encode_frame(&unsubscribe).into()));
        }))
    }

    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError> {
        self.request("store:on_disconnect", json!({"path": path}))
            .await
            .map(|_| ())
    }
}

// =============================================================================
// READER
// =============================================================================

async fn read_loop<S>(mut stream: S, pending: Pending, watchers: Watchers, closed: Arc<AtomicBool>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let bytes = match message {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame = match frames::decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "remote: undecodable frame");
                continue;
            }
        };
        route(frame, &pending, &watchers);
    }
    debug!("remote: socket closed");
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders ends every waiter and subscription.
    lock(&pending).clear();
    lock(&watchers).clear();
}

fn route(frame: Frame, pending: &Pending, watchers: &Watchers) {
    let Some(parent_id) = frame.parent_id.clone() else {
        if frame.syscall == "gateway:error" {
            warn!(data = %frame.data, "remote: gateway error");
        }
        return;
    };
    if frame.status == Status::Item && frame.syscall == "store:changed" {
        let value = frame.data.get("value").cloned().unwrap_or(Value::Null);
        if let Some(tx) = lock(watchers).get(&parent_id) {
            tx.send_replace(value);
        }
        return;
    }
    if frame.status.is_terminal() {
        if let Some(tx) = lock(pending).remove(&parent_id) {
            let _ = tx.send(frame);
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn request_frame(syscall: &str, data: Value) -> Frame {
    Frame {
        id: Uuid::new_v4().to_string(),
        parent_id: None,
        ts: now_ms(),
        path: data.get("path").and_then(Value::as_str).map(ToOwned::to_owned),
        from: None,
        syscall: syscall.to_owned(),
        status: Status::Request,
        data,
    }
}

/// Numbers arrive as floats after the protobuf round trip.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn id_from_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

fn rejected(reply: &Frame) -> StoreError {
    let field = |key: &str| {
        reply
            .data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };
    let code = field("code");
    let message = field("message");
    if code == "E_INVALID_PATH" {
        return StoreError::InvalidPath(reply.path.clone().unwrap_or_default());
    }
    StoreError::Rejected { code, message }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
