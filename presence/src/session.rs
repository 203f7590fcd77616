//! Per-participant session context.
//!
//! DESIGN
//! ======
//! Everything one tab mutates while broadcasting lives here: its id, the
//! store handle, the publish gate (throttle clock, last position, activity
//! flags), the pointer sampler, and whether the disconnect removal is armed.
//! The session is owned by whoever owns the tab's lifetime and lent to the
//! [`Publisher`](crate::publisher::Publisher) and
//! [`CursorFeed`](crate::subscriber::CursorFeed) explicitly.

use std::sync::Arc;

use crate::config::PresenceConfig;
use crate::identity::{self, SessionStorage};
use crate::pointer::PointerSampler;
use crate::publisher::PublishGate;
use crate::record::ParticipantId;
use crate::store::RealtimeStore;

pub struct PresenceSession {
    participant: ParticipantId,
    store: Arc<dyn RealtimeStore>,
    config: PresenceConfig,
    pub(crate) gate: PublishGate,
    pub(crate) sampler: PointerSampler,
    pub(crate) disconnect_armed: bool,
}

impl PresenceSession {
    #[must_use]
    pub fn new(participant: ParticipantId, store: Arc<dyn RealtimeStore>, config: PresenceConfig) -> Self {
        let gate = PublishGate::new(config.throttle_ms);
        Self { participant, store, config, gate, sampler: PointerSampler::new(), disconnect_armed: false }
    }

    /// Open a session whose id comes from (and is remembered in) `storage`.
    #[must_use]
    pub fn open(storage: &dyn SessionStorage, store: Arc<dyn RealtimeStore>, config: PresenceConfig) -> Self {
        Self::new(identity::participant_id(storage), store, config)
    }

    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RealtimeStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Store path of this participant's own record.
    #[must_use]
    pub fn record_path(&self) -> String {
        self.config.record_path(self.participant.as_str())
    }

    /// Visible and focused.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    #[must_use]
    pub fn sampler(&self) -> &PointerSampler {
        &self.sampler
    }

    /// Whether the store will remove our record if we vanish.
    #[must_use]
    pub fn disconnect_armed(&self) -> bool {
        self.disconnect_armed
    }
}
