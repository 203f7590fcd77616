//! Presence tuning knobs.
//!
//! Defaults match what every participant in the demo assumes; overriding
//! them on one side only (e.g. a shorter staleness window) makes that reader
//! garbage-collect records the others still consider alive.

const DEFAULT_COLLECTION: &str = "cursors";
const DEFAULT_THROTTLE_MS: i64 = 16;
const DEFAULT_STALE_AFTER_MS: i64 = 10_000;
const DEFAULT_VIEWPORT_MARGIN: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceConfig {
    /// Store collection holding one record per participant.
    pub collection: String,
    /// Minimum interval between two publishes from one participant.
    pub throttle_ms: i64,
    /// Records older than this are dead.
    pub stale_after_ms: i64,
    /// Extra pixels around the viewport that still count as on-screen.
    pub viewport_margin: f64,
}

impl PresenceConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `PRESENCE_COLLECTION` (`cursors`)
    /// - `PRESENCE_THROTTLE_MS` (16)
    /// - `PRESENCE_STALE_MS` (10000)
    /// - `PRESENCE_VIEWPORT_MARGIN` (100)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            collection: std::env::var("PRESENCE_COLLECTION")
                .ok()
                .map(|v| v.trim().trim_matches('/').to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_owned()),
            throttle_ms: env_parse("PRESENCE_THROTTLE_MS", DEFAULT_THROTTLE_MS).max(0),
            stale_after_ms: env_parse("PRESENCE_STALE_MS", DEFAULT_STALE_AFTER_MS).max(0),
            viewport_margin: env_parse("PRESENCE_VIEWPORT_MARGIN", DEFAULT_VIEWPORT_MARGIN),
        }
    }

    /// Store path of one participant's record.
    #[must_use]
    pub fn record_path(&self, participant: &str) -> String {
        format!("{}/{participant}", self.collection)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_owned(),
            throttle_ms: DEFAULT_THROTTLE_MS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            viewport_margin: DEFAULT_VIEWPORT_MARGIN,
        }
    }
}

/// Parse an environment variable, keeping `default` when unset or malformed.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
