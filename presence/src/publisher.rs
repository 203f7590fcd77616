//! Throttled and coalesced writes of this participant's record.
//!
//! DESIGN
//! ======
//! Split in two halves:
//! - [`PublishGate`] is a pure reducer. It sees positions and lifecycle
//!   signals with an explicit `now` and answers with a [`Decision`]. All the
//!   throttle / coalesce / visibility rules live here and are tested without
//!   a store or a clock.
//! - [`Publisher`] borrows the [`PresenceSession`] and turns decisions into
//!   store calls.
//!
//! LIFECYCLE
//! =========
//! 1. `attach` arms the store-side removal before the record ever exists
//! 2. pointer events → at most one `set` per throttle window, latest wins
//! 3. hide / blur / unload → `remove` immediately, publishing suppressed
//! 4. visible + focused again → next pointer event publishes
//! 5. `detach` (or the event stream closing) → `remove`
//!
//! Deleting on hide is the authoritative "gone" signal; records are always
//! written with `isActive: true`.
//!
//! ERROR HANDLING
//! ==============
//! Store failures are logged and dropped. A publish that never reached the
//! store is forgotten by the gate, so the next pointer event (or scroll
//! re-emit) rewrites the full record even at the same position.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pointer::InputEvent;
use crate::record::{CursorRecord, PagePosition, now_ms};
use crate::session::PresenceSession;

// =============================================================================
// DECISION
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Overwrite our record with this one.
    Publish(CursorRecord),
    /// Position parked until the throttle window reopens at `due_ms`.
    Deferred { due_ms: i64 },
    /// Delete our record now.
    Clear,
    /// Same position as the last publish; nothing to write.
    Unchanged,
    /// Tab hidden or unfocused; position ignored.
    Suppressed,
    /// Nothing to do.
    Idle,
    /// A publish was due but the record was not written; the next update
    /// retries.
    Failed,
}

// =============================================================================
// GATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct PublishGate {
    throttle_ms: i64,
    last_publish_ms: Option<i64>,
    last_published: Option<PagePosition>,
    pending: Option<PagePosition>,
    visible: bool,
    focused: bool,
}

impl PublishGate {
    /// A gate for a tab that starts visible and focused.
    #[must_use]
    pub fn new(throttle_ms: i64) -> Self {
        Self {
            throttle_ms: throttle_ms.max(0),
            last_publish_ms: None,
            last_published: None,
            pending: None,
            visible: true,
            focused: true,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.visible && self.focused
    }

    /// When the parked position becomes publishable, if one is parked.
    #[must_use]
    pub fn pending_due(&self) -> Option<i64> {
        self.pending?;
        Some(self.window_opens_at())
    }

    pub fn on_pointer_at(&mut self, position: PagePosition, now: i64) -> Decision {
        if !self.is_active() {
            self.pending = None;
            return Decision::Suppressed;
        }
        if self.last_published == Some(position) {
            self.pending = None;
            return Decision::Unchanged;
        }
        if self.in_window(now) {
            self.pending = Some(position);
            return Decision::Deferred { due_ms: self.window_opens_at() };
        }
        self.publish(position, now)
    }

    /// Publish the parked position if its window has opened.
    pub fn flush_at(&mut self, now: i64) -> Decision {
        if !self.is_active() {
            self.pending = None;
            return Decision::Idle;
        }
        let Some(position) = self.pending else {
            return Decision::Idle;
        };
        if self.in_window(now) {
            return Decision::Deferred { due_ms: self.window_opens_at() };
        }
        self.publish(position, now)
    }

    pub fn on_visibility(&mut self, hidden: bool) -> Decision {
        let was_active = self.is_active();
        self.visible = !hidden;
        self.transition(was_active)
    }

    pub fn on_focus(&mut self) -> Decision {
        let was_active = self.is_active();
        self.focused = true;
        self.transition(was_active)
    }

    pub fn on_blur(&mut self) -> Decision {
        let was_active = self.is_active();
        self.focused = false;
        self.transition(was_active)
    }

    /// Page is going away. Always clears, even if already inactive.
    pub fn on_unload(&mut self) -> Decision {
        self.visible = false;
        self.forget();
        Decision::Clear
    }

    fn transition(&mut self, was_active: bool) -> Decision {
        if was_active && !self.is_active() {
            self.forget();
            return Decision::Clear;
        }
        Decision::Idle
    }

    /// The last publish never reached the store. Keeps the throttle clock so
    /// retries still respect the window.
    pub fn publish_failed(&mut self) {
        self.last_published = None;
    }

    /// After a clear the record is gone, so the next position must be written
    /// even if it equals the last one.
    fn forget(&mut self) {
        self.pending = None;
        self.last_published = None;
    }

    fn in_window(&self, now: i64) -> bool {
        self.last_publish_ms
            .is_some_and(|last| now.saturating_sub(last) < self.throttle_ms)
    }

    fn window_opens_at(&self) -> i64 {
        self.last_publish_ms
            .map_or(0, |last| last.saturating_add(self.throttle_ms))
    }

    fn publish(&mut self, position: PagePosition, now: i64) -> Decision {
        self.last_publish_ms = Some(now);
        self.last_published = Some(position);
        self.pending = None;
        Decision::Publish(CursorRecord::active(position, now))
    }
}

// =============================================================================
// PUBLISHER
// =============================================================================

pub struct Publisher<'s> {
    session: &'s mut PresenceSession,
}

impl<'s> Publisher<'s> {
    #[must_use]
    pub fn new(session: &'s mut PresenceSession) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn session(&self) -> &PresenceSession {
        self.session
    }

    /// Arm the store-side removal of our record. Idempotent; returns whether
    /// the removal is armed.
    pub async fn attach(&mut self) -> bool {
        if self.session.disconnect_armed {
            return true;
        }
        let path = self.session.record_path();
        let armed = self.session.store().on_disconnect_remove(&path).await;
        match armed {
            Ok(()) => {
                self.session.disconnect_armed = true;
                debug!(%path, "presence: disconnect removal armed");
                true
            }
            Err(e) => {
                warn!(error = %e, %path, "presence: failed to arm disconnect removal");
                false
            }
        }
    }

    /// Feed one input event and apply whatever the gate decides.
    pub async fn handle(&mut self, event: &InputEvent) -> Decision {
        self.handle_at(event, now_ms()).await
    }

    pub async fn handle_at(&mut self, event: &InputEvent, now: i64) -> Decision {
        let decision = match event {
            InputEvent::VisibilityChange { hidden } => self.session.gate.on_visibility(*hidden),
            InputEvent::Focus => self.session.gate.on_focus(),
            InputEvent::Blur => self.session.gate.on_blur(),
            InputEvent::BeforeUnload => self.session.gate.on_unload(),
            InputEvent::PointerMove { .. } | InputEvent::TouchMove { .. } | InputEvent::Scroll { .. } => {
                match self.session.sampler.observe(event) {
                    Some(position) => self.session.gate.on_pointer_at(position, now),
                    None => Decision::Idle,
                }
            }
        };
        self.apply(decision).await
    }

    /// Publish a parked position whose window has opened.
    pub async fn flush_due(&mut self) -> Decision {
        self.flush_due_at(now_ms()).await
    }

    pub async fn flush_due_at(&mut self, now: i64) -> Decision {
        let decision = self.session.gate.flush_at(now);
        self.apply(decision).await
    }

    /// Graceful teardown: stop publishing and delete our record.
    pub async fn detach(&mut self) {
        let decision = self.session.gate.on_unload();
        self.apply(decision).await;
    }

    /// Drive the publisher from an event stream until it closes, then detach.
    pub async fn run(mut self, mut events: mpsc::Receiver<InputEvent>) {
        self.attach().await;
        loop {
            let due = self.session.gate.pending_due();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle(&event).await;
                }
                () = sleep_until_ms(due.unwrap_or(0)), if due.is_some() => {
                    self.flush_due().await;
                }
            }
        }
        self.detach().await;
    }

    /// Carry out `decision`. A publish that was not written comes back as
    /// [`Decision::Failed`].
    async fn apply(&mut self, decision: Decision) -> Decision {
        let path = self.session.record_path();
        match &decision {
            Decision::Publish(record) => {
                // Never create a record the store cannot clean up for us.
                if !self.attach().await {
                    self.session.gate.publish_failed();
                    return Decision::Failed;
                }
                if let Err(e) = self.session.store().set(&path, record.to_value()).await {
                    warn!(error = %e, %path, "presence: publish failed");
                    self.session.gate.publish_failed();
                    return Decision::Failed;
                }
            }
            Decision::Clear => {
                if let Err(e) = self.session.store().remove(&path).await {
                    warn!(error = %e, %path, "presence: clear failed");
                }
            }
            Decision::Deferred { .. }
            | Decision::Unchanged
            | Decision::Suppressed
            | Decision::Idle
            | Decision::Failed => {}
        }
        decision
    }
}

/// Sleep until the wall-clock millisecond `due_ms`; returns at once if past.
pub(crate) async fn sleep_until_ms(due_ms: i64) {
    let wait = due_ms.saturating_sub(now_ms()).max(0);
    tokio::time::sleep(Duration::from_millis(u64::try_from(wait).unwrap_or(0))).await;
}

#[cfg(test)]
#[path = "publisher_test.rs"]
mod tests;
