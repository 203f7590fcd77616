//! Wire frames for the cursorcast store protocol.
//!
//! PROTOCOL
//! ========
//! Every websocket message is one protobuf-encoded [`Frame`]. A client opens
//! an exchange with a `request`; the server answers with zero or more `item`
//! frames and exactly one terminal frame (`done`, `error` or `cancel`), each
//! carrying the request id as `parent_id`.
//!
//! | syscall               | data                      | reply                                  |
//! |-----------------------|---------------------------|----------------------------------------|
//! | `session:connected`   | `{connection_id}`         | server greeting, no reply              |
//! | `store:set`           | `{path, value}`           | `done`                                 |
//! | `store:remove`        | `{path}`                  | `done`                                 |
//! | `store:subscribe`     | `{path}`                  | `done {subscription_id}`, then `store:changed` items |
//! | `store:unsubscribe`   | `{subscription_id}`       | `done`                                 |
//! | `store:on_disconnect` | `{path}`                  | `done`                                 |
//!
//! NUMBERS
//! =======
//! The payload travels as a protobuf `Value`, which has a single `f64` number
//! kind. Integers therefore come back as floats (`1` → `1.0`); readers of
//! numeric fields such as record timestamps accept either.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest frame [`decode_frame`] accepts. A full `cursors` snapshot for a
/// few thousand participants still fits.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

// =============================================================================
// STATUS
// =============================================================================

/// Where a frame sits in its request/response exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Opens an exchange; also used for server greetings and notices.
    Request,
    /// One snapshot of a subscription. More may follow.
    Item,
    Done,
    Error,
    Cancel,
}

impl Status {
    /// `done`, `error` and `cancel` close an exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancel)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        let wire = match status {
            Status::Request => WireStatus::Request,
            Status::Item => WireStatus::Item,
            Status::Done => WireStatus::Done,
            Status::Error => WireStatus::Error,
            Status::Cancel => WireStatus::Cancel,
        };
        wire as i32
    }
}

impl TryFrom<i32> for Status {
    type Error = CodecError;

    fn try_from(value: i32) -> Result<Self, CodecError> {
        let wire = WireStatus::try_from(value).map_err(|_| CodecError::InvalidStatus(value))?;
        // `Self::Error` would name the associated type here.
        Ok(match wire {
            WireStatus::Request => Status::Request,
            WireStatus::Item => Status::Item,
            WireStatus::Done => Status::Done,
            WireStatus::Error => Status::Error,
            WireStatus::Cancel => Status::Cancel,
        })
    }
}

// =============================================================================
// FRAME
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// UUID string, unique per frame.
    pub id: String,
    /// Id of the request this frame answers.
    pub parent_id: Option<String>,
    /// Creation time, epoch milliseconds.
    pub ts: i64,
    /// Store path the frame is about, e.g. `cursors/<participant>`.
    pub path: Option<String>,
    /// Connection id stamped by the server on inbound requests.
    pub from: Option<String>,
    /// `<namespace>:<op>`, e.g. `store:set`.
    pub syscall: String,
    pub status: Status,
    pub data: Value,
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    <WireFrame as From<&Frame>>::from(frame).encode_to_vec()
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// [`CodecError::TooLarge`] above [`MAX_FRAME_BYTES`], [`CodecError::Decode`]
/// for malformed bytes and [`CodecError::InvalidStatus`] for unknown statuses.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge { len: bytes.len(), max: MAX_FRAME_BYTES });
    }
    Frame::try_from(WireFrame::decode(bytes)?)
}

// =============================================================================
// WIRE
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    path: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    syscall: String,
    #[prost(enumeration = "WireStatus", tag = "7")]
    status: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireStatus {
    Request = 0,
    Done = 1,
    Error = 2,
    Cancel = 3,
    Item = 4,
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            parent_id: frame.parent_id.clone(),
            ts: frame.ts,
            path: frame.path.clone(),
            from: frame.from.clone(),
            syscall: frame.syscall.clone(),
            status: frame.status.into(),
            data: Some(payload::to_proto(&frame.data)),
        }
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = CodecError;

    fn try_from(wire: WireFrame) -> Result<Self, CodecError> {
        Ok(Self {
            status: Status::try_from(wire.status)?,
            id: wire.id,
            parent_id: wire.parent_id,
            ts: wire.ts,
            path: wire.path,
            from: wire.from,
            syscall: wire.syscall,
            // A request with no payload reads as `{}`, not `null`.
            data: wire
                .data
                .as_ref()
                .map_or_else(|| Value::Object(serde_json::Map::new()), payload::from_proto),
        })
    }
}

/// JSON payload ↔ `google.protobuf.Value`.
mod payload {
    use prost_types::value::Kind;
    use prost_types::{ListValue, NullValue, Struct};
    use serde_json::{Number, Value};

    pub(crate) fn to_proto(value: &Value) -> prost_types::Value {
        let kind = match value {
            Value::Null => Kind::NullValue(NullValue::NullValue.into()),
            Value::Bool(b) => Kind::BoolValue(*b),
            Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
            Value::String(s) => Kind::StringValue(s.clone()),
            Value::Array(items) => Kind::ListValue(ListValue { values: items.iter().map(to_proto).collect() }),
            Value::Object(fields) => Kind::StructValue(Struct {
                fields: fields.iter().map(|(k, v)| (k.clone(), to_proto(v))).collect(),
            }),
        };
        prost_types::Value { kind: Some(kind) }
    }

    /// Non-finite numbers have no JSON form and become `null`.
    pub(crate) fn from_proto(value: &prost_types::Value) -> Value {
        match &value.kind {
            None | Some(Kind::NullValue(_)) => Value::Null,
            Some(Kind::BoolValue(b)) => Value::Bool(*b),
            Some(Kind::NumberValue(n)) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Some(Kind::StringValue(s)) => Value::String(s.clone()),
            Some(Kind::ListValue(list)) => Value::Array(list.values.iter().map(from_proto).collect()),
            Some(Kind::StructValue(st)) => {
                Value::Object(st.fields.iter().map(|(k, v)| (k.clone(), from_proto(v))).collect())
            }
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
