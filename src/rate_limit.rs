//! In-memory write limiting per websocket connection.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<u64, VecDeque<Instant>>`, keyed
//! by store connection id. Only mutating syscalls (`store:set`,
//! `store:remove`) are counted. A well-behaved participant publishes at most
//! ~60 times a second, so the default of 240 writes per second leaves room
//! for several tabs multiplexed over one socket while still capping a
//! runaway client.
//!
//! Entries are dropped with [`WriteLimiter::forget`] when the socket closes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use presence::config::env_parse;

use crate::frame::ErrorCode;

const DEFAULT_WRITE_LIMIT: usize = 240;
const DEFAULT_WRITE_WINDOW_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLimitConfig {
    pub limit: usize,
    pub window: Duration,
}

impl WriteLimitConfig {
    /// `WRITE_LIMIT` writes per `WRITE_LIMIT_WINDOW_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            limit: env_parse("WRITE_LIMIT", DEFAULT_WRITE_LIMIT),
            window: Duration::from_millis(env_parse("WRITE_LIMIT_WINDOW_MS", DEFAULT_WRITE_WINDOW_MS)),
        }
    }
}

impl Default for WriteLimitConfig {
    fn default() -> Self {
        Self { limit: DEFAULT_WRITE_LIMIT, window: Duration::from_millis(DEFAULT_WRITE_WINDOW_MS) }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WriteLimitError {
    #[error("write rate limit exceeded (max {limit} writes/{window_ms}ms)")]
    Exceeded { limit: usize, window_ms: u128 },
}

impl ErrorCode for WriteLimitError {
    fn error_code(&self) -> &'static str {
        "E_RATE_LIMITED"
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// LIMITER
// =============================================================================

#[derive(Clone)]
pub struct WriteLimiter {
    inner: Arc<Mutex<HashMap<u64, VecDeque<Instant>>>>,
    config: WriteLimitConfig,
}

impl WriteLimiter {
    #[must_use]
    pub fn new(config: WriteLimitConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), config }
    }

    #[must_use]
    pub fn config(&self) -> WriteLimitConfig {
        self.config
    }

    /// Check the connection's window, then record the write.
    ///
    /// # Errors
    ///
    /// Returns [`WriteLimitError::Exceeded`] when the window is full.
    pub fn check_and_record(&self, connection: u64) -> Result<(), WriteLimitError> {
        self.check_and_record_at(connection, Instant::now())
    }

    /// Check + record with explicit timestamp (for testing).
    pub(crate) fn check_and_record_at(&self, connection: u64, now: Instant) -> Result<(), WriteLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let cfg = self.config;

        let deque = inner.entry(connection).or_default();
        prune_window(deque, now, cfg.window);
        if deque.len() >= cfg.limit {
            return Err(WriteLimitError::Exceeded { limit: cfg.limit, window_ms: cfg.window.as_millis() });
        }
        deque.push_back(now);
        Ok(())
    }

    /// Drop all state for a closed connection.
    pub fn forget(&self, connection: u64) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&connection);
    }

    /// Number of connections with recorded writes.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Default for WriteLimiter {
    fn default() -> Self {
        Self::new(WriteLimitConfig::default())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
