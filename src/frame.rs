//! Frame — the universal message type of the store server.
//!
//! ARCHITECTURE
//! ============
//! Every exchange on the websocket is a Frame. Clients send request frames,
//! the server dispatches on syscall prefix, and responses flow back as
//! item/done/error frames correlated by `parent_id`. On the wire frames are
//! protobuf (see the `frames` crate); this type is the server's working
//! representation with typed ids and a flat data map.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always a string-keyed map.
//! - Responses correlate to requests via `parent_id`.
//! - `path` names the store node a frame is about; it is inherited by replies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use presence::record::now_ms;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, Value>;

pub use frames::Status;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for presence::store::StoreError {
    fn error_code(&self) -> &'static str {
        presence::store::StoreError::error_code(self)
    }

    fn retryable(&self) -> bool {
        presence::store::StoreError::retryable(self)
    }
}

/// A wire frame that cannot become a server [`Frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame id: {0:?}")]
    InvalidId(String),
    #[error("frame data must be an object")]
    DataNotObject,
}

impl ErrorCode for FrameError {
    fn error_code(&self) -> &'static str {
        "E_BAD_REQUEST"
    }
}

impl ErrorCode for frames::CodecError {
    fn error_code(&self) -> &'static str {
        "E_BAD_REQUEST"
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    /// Create a request frame. Also used for unsolicited server notices.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            path: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create an item response carrying one result.
    #[must_use]
    pub fn item(&self, data: Data) -> Self {
        self.reply(Status::Item, data)
    }

    /// Create a done response. Terminal, carries no data.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a done response carrying a payload. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id`, `path`, and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            path: self.path.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_syscall(mut self, syscall: impl Into<String>) -> Self {
        self.syscall = syscall.into();
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }

    /// Everything after the first ':' (empty when there is none).
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }

    /// Store path named by the frame: the `path` field, else `data.path`.
    #[must_use]
    pub fn target_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .or_else(|| self.data.get("path").and_then(Value::as_str))
    }
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

impl From<&Frame> for frames::Frame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.to_string(),
            parent_id: frame.parent_id.map(|id| id.to_string()),
            ts: frame.ts,
            path: frame.path.clone(),
            from: frame.from.clone(),
            syscall: frame.syscall.clone(),
            status: frame.status,
            data: Value::Object(
                frame
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<frames::Frame> for Frame {
    type Error = FrameError;

    fn try_from(wire: frames::Frame) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .parse()
            .map_err(|_| FrameError::InvalidId(wire.id.clone()))?;
        let parent_id = match wire.parent_id {
            Some(raw) => Some(raw.parse().map_err(|_| FrameError::InvalidId(raw.clone()))?),
            None => None,
        };
        let data = match wire.data {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => Data::new(),
            _ => return Err(FrameError::DataNotObject),
        };
        Ok(Self {
            id,
            parent_id,
            ts: wire.ts,
            path: wire.path,
            from: wire.from,
            syscall: wire.syscall,
            status: wire.status,
            data,
        })
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
