//! WebSocket handler — the store protocol.
//!
//! DESIGN
//! ======
//! On upgrade, opens a `StoreConnection` for the socket and enters a
//! `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall prefix
//! - Subscription snapshots from forwarder tasks → forward to client
//!
//! Handler functions validate, touch the store and return an `Outcome`. The
//! dispatch layer owns the reply to the sender. Snapshots never go through
//! the dispatch layer: each subscription has its own forwarder task feeding
//! the per-connection channel.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connection_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch replies with done / error
//! 4. Close (clean or not) → abort forwarders → drop the connection, which
//!    runs every `store:on_disconnect` removal it registered

use std::collections::HashMap;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use presence::store::{RealtimeStore, StoreConnection, Subscription};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, FRAME_CODE, FRAME_MESSAGE, FRAME_RETRYABLE, Frame, Status};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("{0} required")]
    Missing(&'static str),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for RequestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_BAD_REQUEST",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Everything one socket owns.
pub(crate) struct WsSession {
    connection: StoreConnection,
    client_tx: mpsc::Sender<Frame>,
    subscriptions: HashMap<Uuid, JoinHandle<()>>,
}

impl WsSession {
    pub(crate) fn new(connection: StoreConnection, client_tx: mpsc::Sender<Frame>) -> Self {
        Self { connection, client_tx, subscriptions: HashMap::new() }
    }

    pub(crate) fn connection_id(&self) -> u64 {
        self.connection.id()
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        for (_, forwarder) in self.subscriptions.drain() {
            forwarder.abort();
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    // Per-connection channel for subscription snapshots.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);
    let mut session = WsSession::new(state.store.connect(), client_tx);
    let connection_id = session.connection_id();

    let welcome = Frame::request("session:connected", Data::new()).with_data("connection_id", connection_id);
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        for frame in process_inbound_bytes(&state, &mut session, &bytes).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Text(_) => {
                        let err = gateway_error("E_BAD_REQUEST", "binary protobuf frames only");
                        let _ = send_frame(&mut socket, &err).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    state.write_limiter.forget(connection_id);
    let removals = session.connection.pending_removals().len();
    drop(session);
    info!(connection_id, removals, limited = state.write_limiter.tracked(), "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound binary frame and return frames for the sender.
///
/// Keeps websocket transport concerns out of frame handling so tests can
/// drive the protocol without a socket.
pub(crate) async fn process_inbound_bytes(state: &AppState, session: &mut WsSession, bytes: &[u8]) -> Vec<Frame> {
    let connection_id = session.connection_id();
    let mut req = match frames::decode_frame(bytes) {
        Ok(wire) => match Frame::try_from(wire) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id, error = %e, "ws: invalid inbound frame");
                return vec![gateway_error(e.error_code(), e.to_string())];
            }
        },
        Err(e) => {
            warn!(connection_id, error = %e, "ws: undecodable inbound frame");
            return vec![gateway_error(e.error_code(), e.to_string())];
        }
    };

    if req.status != Status::Request {
        debug!(connection_id, id = %req.id, status = ?req.status, "ws: ignoring non-request frame");
        return Vec::new();
    }

    // Stamp the connection as `from`.
    req.from = Some(connection_id.to_string());

    let result = match req.prefix() {
        "store" => handle_store(state, session, &req).await,
        _ => Err(req.error_from(&RequestError::UnknownSyscall(req.syscall.clone()))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// STORE HANDLERS
// =============================================================================

async fn handle_store(state: &AppState, session: &mut WsSession, req: &Frame) -> Result<Outcome, Frame> {
    let connection_id = session.connection_id();

    match req.op() {
        "set" => {
            let path = required_path(req)?;
            let Some(value) = req.data.get("value").cloned() else {
                return Err(req.error_from(&RequestError::Missing("value")));
            };
            check_write(state, connection_id, req)?;
            session
                .connection
                .set(path, value)
                .await
                .map_err(|e| req.error_from(&e))?;
            debug!(connection_id, %path, "ws: store set");
            Ok(Outcome::Done)
        }
        "remove" => {
            let path = required_path(req)?;
            check_write(state, connection_id, req)?;
            session
                .connection
                .remove(path)
                .await
                .map_err(|e| req.error_from(&e))?;
            debug!(connection_id, %path, "ws: store remove");
            Ok(Outcome::Done)
        }
        "subscribe" => {
            let path = req.target_path().unwrap_or_default().to_owned();
            let subscription = session
                .connection
                .subscribe(&path)
                .await
                .map_err(|e| req.error_from(&e))?;
            let subscription_id = Uuid::new_v4();
            let forwarder = tokio::spawn(forward_snapshots(
                req.clone(),
                subscription_id,
                path.clone(),
                subscription,
                session.client_tx.clone(),
            ));
            session.subscriptions.insert(subscription_id, forwarder);
            info!(connection_id, %subscription_id, %path, "ws: subscribed");

            let mut data = Data::new();
            data.insert("subscription_id".into(), Value::String(subscription_id.to_string()));
            Ok(Outcome::Reply(data))
        }
        "unsubscribe" => {
            let Some(subscription_id) = req
                .data
                .get("subscription_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                return Err(req.error_from(&RequestError::Missing("subscription_id")));
            };
            if let Some(forwarder) = session.subscriptions.remove(&subscription_id) {
                forwarder.abort();
                info!(connection_id, %subscription_id, "ws: unsubscribed");
            }
            Ok(Outcome::Done)
        }
        "on_disconnect" => {
            let path = required_path(req)?;
            session
                .connection
                .on_disconnect_remove(path)
                .await
                .map_err(|e| req.error_from(&e))?;
            info!(connection_id, %path, "ws: disconnect removal registered");
            Ok(Outcome::Done)
        }
        _ => Err(req.error_from(&RequestError::UnknownSyscall(req.syscall.clone()))),
    }
}

fn required_path(req: &Frame) -> Result<&str, Frame> {
    req.target_path()
        .ok_or_else(|| req.error_from(&RequestError::Missing("path")))
}

fn check_write(state: &AppState, connection_id: u64, req: &Frame) -> Result<(), Frame> {
    state
        .write_limiter
        .check_and_record(connection_id)
        .map_err(|e| {
            warn!(connection_id, error = %e, "ws: write rejected");
            req.error_from(&e)
        })
}

/// Push every snapshot of one subscription to the client as `store:changed`
/// items correlated to the subscribe request.
async fn forward_snapshots(
    req: Frame,
    subscription_id: Uuid,
    path: String,
    mut subscription: Subscription,
    client_tx: mpsc::Sender<Frame>,
) {
    while let Some(value) = subscription.next().await {
        let item = req
            .item(Data::new())
            .with_syscall("store:changed")
            .with_path(path.clone())
            .with_data("subscription_id", subscription_id.to_string())
            .with_data("path", path.clone())
            .with_data("value", value);
        if client_tx.send(item).await.is_err() {
            break;
        }
    }
}

/// Unsolicited error notice for frames that could not be parsed at all.
fn gateway_error(code: &str, message: impl Into<String>) -> Frame {
    Frame::request("gateway:error", Data::new())
        .with_data(FRAME_CODE, code)
        .with_data(FRAME_MESSAGE, message.into())
        .with_data(FRAME_RETRYABLE, false)
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let bytes = frames::encode_frame(&frames::Frame::from(frame));
    socket.send(Message::Binary(bytes.into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
