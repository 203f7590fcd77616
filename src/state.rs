//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the one hierarchical store every participant reads and writes, and
//! the per-connection write limiter. Each websocket opens its own
//! `StoreConnection` from `store`, so disconnect hooks are scoped to the
//! socket that registered them.

use presence::store::MemoryStore;

use crate::rate_limit::{WriteLimitConfig, WriteLimiter};

/// Clone is required by Axum; inner fields are Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub store: MemoryStore,
    pub write_limiter: WriteLimiter,
}

impl AppState {
    #[must_use]
    pub fn new(write_limits: WriteLimitConfig) -> Self {
        Self { store: MemoryStore::new(), write_limiter: WriteLimiter::new(write_limits) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use std::time::Duration;

    /// State with default write limits.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(WriteLimitConfig::default())
    }

    /// State whose write limiter trips after `limit` writes per minute.
    #[must_use]
    pub fn test_app_state_with_write_limit(limit: usize) -> AppState {
        AppState::new(WriteLimitConfig { limit, window: Duration::from_secs(60) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_store() {
        let state = test_helpers::test_app_state();
        let clone = state.clone();
        state
            .store
            .write("cursors/a", serde_json::json!(1))
            .expect("write");
        assert_eq!(clone.store.snapshot("cursors/a"), serde_json::json!(1));
    }

    #[test]
    fn clones_share_one_limiter() {
        let state = test_helpers::test_app_state_with_write_limit(1);
        let clone = state.clone();
        state.write_limiter.check_and_record(1).expect("first write");
        assert!(clone.write_limiter.check_and_record(1).is_err());
    }
}
