use super::*;
use crate::state::test_helpers;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =============================================================================
// HELPERS
// =============================================================================

fn request(syscall: &str, data: Value) -> Frame {
    let Value::Object(map) = data else {
        panic!("request data must be an object");
    };
    let mut frame = Frame::request(syscall, Data::new());
    frame.data = map.into_iter().collect();
    frame
}

fn encode(frame: &Frame) -> Vec<u8> {
    frames::encode_frame(&frames::Frame::from(frame))
}

fn new_session(state: &AppState) -> (WsSession, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(256);
    (WsSession::new(state.store.connect(), tx), rx)
}

async fn call(state: &AppState, session: &mut WsSession, req: &Frame) -> Frame {
    let mut replies = process_inbound_bytes(state, session, &encode(req)).await;
    assert_eq!(replies.len(), 1, "expected exactly one reply");
    replies.remove(0)
}

async fn recv_snapshot(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("snapshot receive timed out")
        .expect("snapshot channel closed unexpectedly")
}

async fn assert_no_snapshot(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no snapshot frame"
    );
}

fn code(frame: &Frame) -> Option<&str> {
    frame.data.get("code").and_then(Value::as_str)
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn set_writes_through_to_the_store() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let req = request("store:set", json!({"path": "cursors/a", "value": {"x": 1, "y": 2, "timestamp": 5}}));
    let reply = call(&state, &mut session, &req).await;

    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.parent_id, Some(req.id));
    assert_eq!(state.store.snapshot("cursors/a")["x"], json!(1.0));
}

#[tokio::test]
async fn set_accepts_path_on_the_frame() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let req = request("store:set", json!({"value": true})).with_path("cursors/b");
    let reply = call(&state, &mut session, &req).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(state.store.snapshot("cursors/b"), json!(true));
}

#[tokio::test]
async fn set_root_is_rejected() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let reply = call(&state, &mut session, &request("store:set", json!({"path": "/", "value": 1}))).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(code(&reply), Some("E_INVALID_PATH"));
}

#[tokio::test]
async fn set_without_value_is_a_bad_request() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let reply = call(&state, &mut session, &request("store:set", json!({"path": "cursors/a"}))).await;
    assert_eq!(code(&reply), Some("E_BAD_REQUEST"));

    let reply = call(&state, &mut session, &request("store:remove", json!({}))).await;
    assert_eq!(code(&reply), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn set_null_removes() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    call(&state, &mut session, &request("store:set", json!({"path": "cursors/a", "value": 1}))).await;
    let reply = call(&state, &mut session, &request("store:set", json!({"path": "cursors/a", "value": null}))).await;
    assert_eq!(reply.status, Status::Done);
    assert!(state.store.snapshot("cursors/a").is_null());
}

#[tokio::test]
async fn removing_a_missing_record_succeeds() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    for _ in 0..2 {
        let reply = call(&state, &mut session, &request("store:remove", json!({"path": "cursors/ghost"}))).await;
        assert_eq!(reply.status, Status::Done);
    }
}

#[tokio::test]
async fn unknown_syscalls_are_rejected() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let reply = call(&state, &mut session, &request("room:join", json!({}))).await;
    assert_eq!(code(&reply), Some("E_UNKNOWN_SYSCALL"));

    let reply = call(&state, &mut session, &request("store:explode", json!({}))).await;
    assert_eq!(code(&reply), Some("E_UNKNOWN_SYSCALL"));
}

#[tokio::test]
async fn garbage_bytes_get_a_gateway_error() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let replies = process_inbound_bytes(&state, &mut session, &[0xff, 0xff, 0xff]).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, "gateway:error");
    assert_eq!(code(&replies[0]), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn non_request_frames_are_ignored() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let done = request("store:set", json!({})).done();
    assert!(process_inbound_bytes(&state, &mut session, &encode(&done)).await.is_empty());
}

#[tokio::test]
async fn write_burst_is_rate_limited() {
    let state = test_helpers::test_app_state_with_write_limit(2);
    let (mut session, _rx) = new_session(&state);

    for i in 0..2 {
        let reply = call(&state, &mut session, &request("store:set", json!({"path": "cursors/a", "value": i}))).await;
        assert_eq!(reply.status, Status::Done);
    }
    let reply = call(&state, &mut session, &request("store:set", json!({"path": "cursors/a", "value": 3}))).await;
    assert_eq!(code(&reply), Some("E_RATE_LIMITED"));
    assert_eq!(reply.data.get("retryable").and_then(Value::as_bool), Some(true));

    // Another connection has its own window.
    let (mut other, _rx2) = new_session(&state);
    let reply = call(&state, &mut other, &request("store:set", json!({"path": "cursors/b", "value": 1}))).await;
    assert_eq!(reply.status, Status::Done);
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[tokio::test]
async fn subscribe_streams_snapshots_correlated_to_the_request() {
    let state = test_helpers::test_app_state();
    let (mut reader, mut reader_rx) = new_session(&state);
    let (mut writer, _writer_rx) = new_session(&state);

    let sub_req = request("store:subscribe", json!({"path": "cursors"}));
    let reply = call(&state, &mut reader, &sub_req).await;
    assert_eq!(reply.status, Status::Done);
    let subscription_id = reply
        .data
        .get("subscription_id")
        .and_then(Value::as_str)
        .expect("subscription_id")
        .to_owned();

    let first = recv_snapshot(&mut reader_rx).await;
    assert_eq!(first.syscall, "store:changed");
    assert_eq!(first.status, Status::Item);
    assert_eq!(first.parent_id, Some(sub_req.id));
    assert_eq!(first.data.get("subscription_id").and_then(Value::as_str), Some(subscription_id.as_str()));
    assert_eq!(first.data.get("value"), Some(&Value::Null));

    call(&state, &mut writer, &request("store:set", json!({"path": "cursors/w", "value": {"x": 3}}))).await;
    let next = recv_snapshot(&mut reader_rx).await;
    assert_eq!(next.data.get("value"), Some(&json!({"w": {"x": 3.0}})));
    assert_eq!(next.data.get("path").and_then(Value::as_str), Some("cursors"));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let state = test_helpers::test_app_state();
    let (mut session, mut rx) = new_session(&state);

    let reply = call(&state, &mut session, &request("store:subscribe", json!({"path": "cursors"}))).await;
    let subscription_id = reply
        .data
        .get("subscription_id")
        .cloned()
        .expect("subscription_id");
    let _ = recv_snapshot(&mut rx).await;

    let reply = call(
        &state,
        &mut session,
        &request("store:unsubscribe", json!({"subscription_id": subscription_id})),
    )
    .await;
    assert_eq!(reply.status, Status::Done);

    state.store.write("cursors/late", json!(1)).expect("write");
    assert_no_snapshot(&mut rx).await;
}

#[tokio::test]
async fn unsubscribe_requires_an_id() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);
    let reply = call(&state, &mut session, &request("store:unsubscribe", json!({}))).await;
    assert_eq!(code(&reply), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn closing_a_session_releases_its_watchers() {
    let state = test_helpers::test_app_state();
    let (mut session, mut rx) = new_session(&state);
    call(&state, &mut session, &request("store:subscribe", json!({"path": "cursors"}))).await;
    let _ = recv_snapshot(&mut rx).await;
    assert_eq!(state.store.watcher_count(), 1);

    drop(session);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(state.store.watcher_count(), 0);
}

// =============================================================================
// DISCONNECT HOOKS
// =============================================================================

#[tokio::test]
async fn session_end_runs_registered_removals() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);

    let reply = call(&state, &mut session, &request("store:on_disconnect", json!({"path": "cursors/me"}))).await;
    assert_eq!(reply.status, Status::Done);
    call(&state, &mut session, &request("store:set", json!({"path": "cursors/me", "value": {"x": 1}}))).await;
    assert!(!state.store.snapshot("cursors/me").is_null());

    drop(session);
    assert!(state.store.snapshot("cursors/me").is_null());
}

#[tokio::test]
async fn on_disconnect_for_root_is_rejected() {
    let state = test_helpers::test_app_state();
    let (mut session, _rx) = new_session(&state);
    let reply = call(&state, &mut session, &request("store:on_disconnect", json!({"path": ""}))).await;
    assert_eq!(code(&reply), Some("E_INVALID_PATH"));
}

// =============================================================================
// END TO END
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, crate::routes::app(state)).await;
    });
    format!("ws://{addr}/api/ws")
}

async fn client_recv(client: &mut Client) -> Frame {
    let fut = async {
        loop {
            match client.next().await.expect("socket open").expect("socket ok") {
                WsMessage::Binary(bytes) => {
                    let wire = frames::decode_frame(&bytes).expect("decode");
                    return Frame::try_from(wire).expect("convert");
                }
                WsMessage::Close(_) => panic!("socket closed"),
                _ => {}
            }
        }
    };
    timeout(Duration::from_secs(2), fut)
        .await
        .expect("frame receive timed out")
}

async fn client_send(client: &mut Client, frame: &Frame) {
    client
        .send(WsMessage::Binary(encode(frame).into()))
        .await
        .expect("send");
}

async fn connect(url: &str) -> Client {
    let (mut client, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect");
    let welcome = client_recv(&mut client).await;
    assert_eq!(welcome.syscall, "session:connected");
    assert!(welcome.data.contains_key("connection_id"));
    client
}

/// Next frame that is not a snapshot.
async fn client_reply(client: &mut Client) -> Frame {
    loop {
        let frame = client_recv(client).await;
        if frame.syscall != "store:changed" {
            return frame;
        }
    }
}

/// Next snapshot whose value satisfies `pred`.
async fn client_snapshot_where(client: &mut Client, pred: impl Fn(&Value) -> bool) -> Value {
    loop {
        let frame = client_recv(client).await;
        if frame.syscall != "store:changed" {
            continue;
        }
        let value = frame.data.get("value").cloned().unwrap_or(Value::Null);
        if pred(&value) {
            return value;
        }
    }
}

#[tokio::test]
async fn abrupt_socket_loss_removes_the_record_for_other_participants() {
    let state = test_helpers::test_app_state();
    let url = spawn_server(state.clone()).await;

    let mut observer = connect(&url).await;
    client_send(&mut observer, &request("store:subscribe", json!({"path": "cursors"}))).await;
    assert_eq!(client_reply(&mut observer).await.status, Status::Done);

    let mut tab = connect(&url).await;
    client_send(&mut tab, &request("store:on_disconnect", json!({"path": "cursors/tab"}))).await;
    assert_eq!(client_reply(&mut tab).await.status, Status::Done);
    let record = json!({"x": 10, "y": 20, "timestamp": 1_700_000_000_000_i64, "isActive": true});
    client_send(&mut tab, &request("store:set", json!({"path": "cursors/tab", "value": record}))).await;
    assert_eq!(client_reply(&mut tab).await.status, Status::Done);

    let seen = client_snapshot_where(&mut observer, |v| v.get("tab").is_some()).await;
    assert_eq!(seen["tab"]["x"], json!(10.0));

    // Kill the tab without any goodbye.
    drop(tab);

    let after = client_snapshot_where(&mut observer, |v| v.get("tab").is_none()).await;
    assert!(after.is_null());
    assert!(state.store.snapshot("cursors/tab").is_null());
}

#[tokio::test]
async fn text_frames_get_a_gateway_error() {
    let state = test_helpers::test_app_state();
    let url = spawn_server(state).await;

    let mut client = connect(&url).await;
    client
        .send(WsMessage::Text("{}".into()))
        .await
        .expect("send text");
    let err = client_reply(&mut client).await;
    assert_eq!(err.syscall, "gateway:error");
    assert_eq!(code(&err), Some("E_BAD_REQUEST"));
}
