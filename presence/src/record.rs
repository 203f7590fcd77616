//! Participant identity and the cursor record every participant publishes.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Opaque, session-scoped participant token. Doubles as the record key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Fresh 128-bit random token.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// POSITIONS
// =============================================================================

/// Absolute document coordinates (viewport coordinates plus scroll offset).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PagePosition {
    pub x: f64,
    pub y: f64,
}

impl PagePosition {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// =============================================================================
// CURSOR RECORD
// =============================================================================

/// Published state of one participant. Overwritten wholesale on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub x: f64,
    pub y: f64,
    /// Producer wall clock, ms since the Unix epoch.
    #[serde(deserialize_with = "millis_from_number")]
    pub timestamp: i64,
    /// Absent on the wire means active; only an explicit `false` is inactive.
    #[serde(rename = "isActive", default = "default_active")]
    pub is_active: bool,
}

impl CursorRecord {
    /// Record for a live, visible participant at `position`.
    #[must_use]
    pub fn active(position: PagePosition, timestamp: i64) -> Self {
        Self { x: position.x, y: position.y, timestamp, is_active: true }
    }

    #[must_use]
    pub fn position(&self) -> PagePosition {
        PagePosition::new(self.x, self.y)
    }

    /// Age relative to `now_ms`. Negative when the producer clock runs ahead.
    #[must_use]
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Parse a store value. `None` for anything that is not a cursor record.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn default_active() -> bool {
    true
}

/// Accept integer or float JSON numbers; the frame codec turns every number into a float.
fn millis_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() {
        return Err(D::Error::custom("timestamp must be a finite number"));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(raw.round() as i64)
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_camel_case_liveness_key() {
        let record = CursorRecord::active(PagePosition::new(10.0, 20.0), 1_000);
        let value = record.to_value();
        assert_eq!(value["isActive"], serde_json::json!(true));
        assert_eq!(value["timestamp"], serde_json::json!(1_000));
        assert!(value.get("is_active").is_none());
    }

    #[test]
    fn record_accepts_float_timestamps() {
        let value = serde_json::json!({"x": 1.0, "y": 2.0, "timestamp": 1_700_000_000_000.0, "isActive": true});
        let record = CursorRecord::from_value(&value).expect("record should parse");
        assert_eq!(record.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn missing_liveness_flag_means_active() {
        let value = serde_json::json!({"x": 1, "y": 2, "timestamp": 5});
        let record = CursorRecord::from_value(&value).expect("record should parse");
        assert!(record.is_active);
    }

    #[test]
    fn non_record_values_do_not_parse() {
        assert!(CursorRecord::from_value(&serde_json::json!("hello")).is_none());
        assert!(CursorRecord::from_value(&serde_json::json!({"x": 1})).is_none());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(ParticipantId::random(), ParticipantId::random());
    }

    #[test]
    fn now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
