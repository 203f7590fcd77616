use super::*;
use presence::store::StoreError;
use serde_json::json;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("store:set", Data::new());
    assert_eq!(frame.syscall, "store:set");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.path.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("store:subscribe", Data::new()).with_path("cursors");
    let item = req.item(Data::new());

    assert_eq!(item.parent_id, Some(req.id));
    assert_eq!(item.path.as_deref(), Some("cursors"));
    assert_eq!(item.syscall, "store:subscribe");
    assert_eq!(item.status, Status::Item);
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("store:on_disconnect", Data::new());
    assert_eq!(frame.prefix(), "store");
    assert_eq!(frame.op(), "on_disconnect");

    let frame = Frame::request("noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn target_path_prefers_frame_field() {
    let frame = Frame::request("store:set", Data::new())
        .with_data("path", "cursors/from-data")
        .with_path("cursors/from-field");
    assert_eq!(frame.target_path(), Some("cursors/from-field"));

    let frame = Frame::request("store:set", Data::new()).with_data("path", "cursors/a");
    assert_eq!(frame.target_path(), Some("cursors/a"));

    let frame = Frame::request("store:set", Data::new()).with_data("path", 7);
    assert_eq!(frame.target_path(), None);
}

#[test]
fn error_from_typed() {
    let req = Frame::request("store:set", Data::new());
    let err = req.error_from(&StoreError::InvalidPath("/".into()));

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_INVALID_PATH"));
    assert!(
        err.data
            .get("message")
            .and_then(|v| v.as_str())
            .is_some_and(|m| m.contains("invalid store path"))
    );
    assert_eq!(err.data.get("retryable").and_then(Value::as_bool), Some(false));
}

#[test]
fn wire_conversion_keeps_correlation() {
    let req = Frame::request("store:subscribe", Data::new()).with_path("cursors");
    let item = req
        .item(Data::new())
        .with_syscall("store:changed")
        .with_data("value", json!({"a": {"x": 1}}));

    let bytes = frames::encode_frame(&frames::Frame::from(&item));
    let decoded = frames::decode_frame(&bytes).expect("decode");
    let restored = Frame::try_from(decoded).expect("convert");

    assert_eq!(restored.id, item.id);
    assert_eq!(restored.parent_id, Some(req.id));
    assert_eq!(restored.path.as_deref(), Some("cursors"));
    assert_eq!(restored.syscall, "store:changed");
    assert_eq!(restored.status, Status::Item);
    assert_eq!(restored.data.get("value"), Some(&json!({"a": {"x": 1.0}})));
}

#[test]
fn wire_frame_with_bad_id_is_rejected() {
    let mut wire = frames::Frame::from(&Frame::request("store:set", Data::new()));
    wire.id = "not-a-uuid".into();
    let err = Frame::try_from(wire).expect_err("bad id");
    assert!(matches!(err, FrameError::InvalidId(_)));
    assert_eq!(err.error_code(), "E_BAD_REQUEST");
}

#[test]
fn wire_frame_with_scalar_data_is_rejected() {
    let mut wire = frames::Frame::from(&Frame::request("store:set", Data::new()));
    wire.data = json!("scalar");
    assert!(matches!(Frame::try_from(wire), Err(FrameError::DataNotObject)));
}

#[test]
fn wire_frame_with_null_data_becomes_empty_map() {
    let mut wire = frames::Frame::from(&Frame::request("store:set", Data::new()));
    wire.data = Value::Null;
    let frame = Frame::try_from(wire).expect("convert");
    assert!(frame.data.is_empty());
}
