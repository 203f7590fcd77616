//! The live view of everyone else's cursor.
//!
//! DESIGN
//! ======
//! [`reconcile_at`] is the pure half: given one snapshot of the collection it
//! splits records into those worth drawing and those that are dead. A record
//! is dead when it is older than the staleness threshold, explicitly marked
//! inactive, or does not parse as a cursor record at all.
//!
//! [`CursorFeed`] is the async half. Each snapshot replaces the local view
//! wholesale; every dead record gets a best-effort `remove` spawned on the
//! runtime. A record can also die between snapshots by simply aging, so the
//! feed wakes when the oldest visible record crosses the threshold and
//! expires it without waiting for the store. Any reader may delete any key, and deleting a missing key is a
//! no-op, so several readers racing to collect the same record is harmless.
//!
//! Subscription failure is not an error surface: the feed simply shows no
//! cursors.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PresenceConfig;
use crate::publisher::sleep_until_ms;
use crate::record::{CursorRecord, ParticipantId, now_ms};
use crate::session::PresenceSession;
use crate::store::{RealtimeStore, Subscription};

// =============================================================================
// RECONCILE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub visible: BTreeMap<ParticipantId, CursorRecord>,
    pub expired: Vec<ParticipantId>,
}

/// Split a collection snapshot into live remote records and dead ones.
/// Our own record is neither.
#[must_use]
pub fn reconcile_at(snapshot: &Value, self_id: &ParticipantId, now: i64, stale_after_ms: i64) -> Reconciled {
    let mut out = Reconciled::default();
    let Some(entries) = snapshot.as_object() else {
        return out;
    };
    for (key, value) in entries {
        if key == self_id.as_str() {
            continue;
        }
        let id = ParticipantId::from(key.as_str());
        match CursorRecord::from_value(value) {
            Some(record) if record.is_active && record.age_ms(now) <= stale_after_ms => {
                out.visible.insert(id, record);
            }
            _ => out.expired.push(id),
        }
    }
    out
}

// =============================================================================
// FEED
// =============================================================================

enum Wake {
    Snapshot(Option<Value>),
    Expiry,
}

pub struct CursorFeed {
    participant: ParticipantId,
    store: Arc<dyn RealtimeStore>,
    config: PresenceConfig,
    subscription: Option<Subscription>,
    visible: BTreeMap<ParticipantId, CursorRecord>,
}

impl CursorFeed {
    /// Subscribe to the session's collection.
    pub async fn open(session: &PresenceSession) -> Self {
        let config = session.config().clone();
        let collection = &config.collection;
        let subscription = match session.store().subscribe(collection).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(error = %e, %collection, "presence: subscribe failed, no remote cursors");
                None
            }
        };
        Self {
            participant: session.participant().clone(),
            store: Arc::clone(session.store()),
            config,
            subscription,
            visible: BTreeMap::new(),
        }
    }

    /// Whether the feed is still receiving snapshots.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    /// Remote cursors as of the last snapshot.
    #[must_use]
    pub fn visible(&self) -> &BTreeMap<ParticipantId, CursorRecord> {
        &self.visible
    }

    /// Wait for the next snapshot, or for a visible record to age out, and
    /// return the refreshed view. `None` once the subscription has ended.
    pub async fn next_update(&mut self) -> Option<&BTreeMap<ParticipantId, CursorRecord>> {
        loop {
            let expiry = self.next_expiry();
            let wake = {
                let subscription = self.subscription.as_mut()?;
                tokio::select! {
                    snapshot = subscription.next() => Wake::Snapshot(snapshot),
                    () = sleep_until_ms(expiry.unwrap_or(0)), if expiry.is_some() => Wake::Expiry,
                }
            };
            match wake {
                Wake::Snapshot(Some(snapshot)) => {
                    self.apply_at(&snapshot, now_ms());
                    return Some(&self.visible);
                }
                Wake::Snapshot(None) => {
                    debug!(collection = %self.config.collection, "presence: subscription ended");
                    self.subscription = None;
                    return None;
                }
                Wake::Expiry => {
                    if !self.expire_at(now_ms()).is_empty() {
                        return Some(&self.visible);
                    }
                }
            }
        }
    }

    /// Drop visible records that have aged past the threshold since the last
    /// snapshot and collect them. Returns the expired ids.
    pub fn expire_at(&mut self, now: i64) -> Vec<ParticipantId> {
        let stale_after_ms = self.config.stale_after_ms;
        let expired: Vec<ParticipantId> = self
            .visible
            .iter()
            .filter(|(_, record)| record.age_ms(now) > stale_after_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.visible.remove(id);
            self.collect(id);
        }
        expired
    }

    /// First instant at which some visible record is past the threshold.
    #[must_use]
    pub fn next_expiry(&self) -> Option<i64> {
        let stale_after_ms = self.config.stale_after_ms;
        self.visible
            .values()
            .map(|record| record.timestamp.saturating_add(stale_after_ms).saturating_add(1))
            .min()
    }

    /// Replace the view from `snapshot` and collect dead records. Returns the
    /// ids that were scheduled for removal.
    pub fn apply_at(&mut self, snapshot: &Value, now: i64) -> Vec<ParticipantId> {
        let Reconciled { visible, expired } = reconcile_at(snapshot, &self.participant, now, self.config.stale_after_ms);
        self.visible = visible;
        for id in &expired {
            self.collect(id);
        }
        expired
    }

    /// Stop receiving snapshots and forget every remote cursor.
    pub fn close(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.visible.clear();
    }

    fn collect(&self, id: &ParticipantId) {
        let store = Arc::clone(&self.store);
        let path = self.config.record_path(id.as_str());
        tokio::spawn(async move {
            if let Err(e) = store.remove(&path).await {
                debug!(error = %e, %path, "presence: stale record cleanup failed");
            }
        });
    }
}

#[cfg(test)]
#[path = "subscriber_test.rs"]
mod tests;
