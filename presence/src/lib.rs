//! Presence core for the shared-cursor demo.
//!
//! ARCHITECTURE
//! ============
//! Every participant (a browser tab, or a `cursorcast-cli` process) owns one
//! [`session::PresenceSession`]. Input flows one way:
//!
//! ```text
//! InputEvent -> PointerSampler -> PublishGate -> RealtimeStore -> CursorFeed -> render()
//! ```
//!
//! - [`identity`] hands out the session-scoped participant id.
//! - [`pointer`] turns raw input events into absolute page positions.
//! - [`publisher`] throttles, coalesces and writes this participant's record.
//! - [`subscriber`] watches everyone else's records and garbage-collects dead ones.
//! - [`render`] projects live records into the local viewport.
//! - [`store`] is the abstract store capability plus an in-process tree store.
//!
//! Nothing here is fatal: every failure degrades the shared-cursor feature
//! and is logged through `tracing`.

pub mod config;
pub mod identity;
pub mod pointer;
pub mod publisher;
pub mod record;
pub mod render;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod visual;

pub use config::PresenceConfig;
pub use record::{CursorRecord, PagePosition, ParticipantId};
pub use session::PresenceSession;
