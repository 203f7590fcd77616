//! Session-scoped participant ids.
//!
//! DESIGN
//! ======
//! The id is minted locally (no server round trip) and parked in session
//! storage so reloads inside one session keep the same cursor. When storage
//! is unavailable every call mints a fresh id; the participant then shows up
//! as a new cursor after each reload, which is an accepted limitation.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::record::ParticipantId;

/// Storage key holding the participant id.
pub const SESSION_KEY: &str = "userId";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("session storage unavailable: {0}")]
    Unavailable(String),
    #[error("session storage write failed: {0}")]
    Write(String),
}

/// Key-value storage that lives exactly as long as one browsing session.
pub trait SessionStorage: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage rejects the write.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-lifetime session storage.
#[derive(Default)]
pub struct MemorySessionStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, as if the session ended.
    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self
            .items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self
            .items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Return the session's participant id, minting and storing one on first use.
///
/// Never fails: storage errors fall back to a fresh, unstored id.
pub fn participant_id(storage: &dyn SessionStorage) -> ParticipantId {
    match storage.get_item(SESSION_KEY) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return ParticipantId::from(existing),
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "identity: session storage read failed, using ephemeral id");
            return ParticipantId::random();
        }
    }

    let id = ParticipantId::random();
    if let Err(e) = storage.set_item(SESSION_KEY, id.as_str()) {
        warn!(error = %e, "identity: session storage write failed, id will not survive reload");
    }
    id
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
