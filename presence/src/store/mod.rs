//! Shared real-time store capability.
//!
//! DESIGN
//! ======
//! The presence core only needs four things from a store: overwrite a value,
//! delete a value, watch a subtree, and have the store delete a value on our
//! behalf when our connection dies. [`RealtimeStore`] is exactly that set, so
//! the in-process [`MemoryStore`] and the websocket client in `cli` are
//! interchangeable.
//!
//! Paths are `/`-separated; empty segments (leading, trailing or doubled
//! separators) are ignored, so `"/cursors//a/"` and `"cursors/a"` name the
//! same node. Writing `null` is the same as removing.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

pub use memory::{MemoryStore, StoreConnection};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),
    #[error("store connection closed")]
    Closed,
    #[error("store request timed out")]
    Timeout,
    #[error("store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl StoreError {
    /// Grepable code, mirrored in error frames.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "E_INVALID_PATH",
            Self::Closed => "E_CLOSED",
            Self::Timeout => "E_TIMEOUT",
            Self::Rejected { .. } => "E_REJECTED",
        }
    }

    /// Transient failures heal on the next publish.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Rejected { .. })
    }
}

// =============================================================================
// CAPABILITY
// =============================================================================

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Overwrite the value at `path`. `null` removes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Delete the value at `path`. Deleting a missing value succeeds.
    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Watch the subtree at `path`. The current snapshot arrives first.
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// Ask the store to delete `path` once this connection goes away,
    /// whether it closes cleanly or not.
    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError>;
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Live view of one subtree. Each snapshot replaces the previous one;
/// snapshots produced faster than they are read collapse into the latest.
pub struct Subscription {
    rx: watch::Receiver<Value>,
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    #[must_use]
    pub fn new(rx: watch::Receiver<Value>) -> Self {
        Self { rx, on_cancel: None }
    }

    /// Attach cleanup that runs on [`Subscription::unsubscribe`] or drop.
    #[must_use]
    pub fn with_cancel(mut self, on_cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(on_cancel));
        self
    }

    /// Wait for the next snapshot. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =============================================================================
// PATHS
// =============================================================================

/// Split a path into its non-empty segments.
#[must_use]
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Segments of a path that is about to be written. The root is not writable.
///
/// # Errors
///
/// Returns [`StoreError::InvalidPath`] when the path names the root.
pub fn writable_segments(path: &str) -> Result<Vec<String>, StoreError> {
    let segments = segments(path);
    if segments.is_empty() {
        return Err(StoreError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}
