//! Viewport projection of live cursor records.
//!
//! Records carry absolute document coordinates. Each reader subtracts its own
//! scroll offset to get viewport coordinates and only draws markers that land
//! inside the viewport grown by a margin on every side, so a cursor sliding
//! in from just off-screen is already drawn when it arrives.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::{CursorRecord, PagePosition, ParticipantId};
use crate::visual;

// =============================================================================
// VIEWPORT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll: PagePosition,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    /// Unscrolled viewport of the given size.
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { scroll: PagePosition::default(), width, height }
    }

    pub fn on_scroll(&mut self, x: f64, y: f64) {
        self.scroll = PagePosition::new(x, y);
    }

    /// Absolute document position to viewport-relative position.
    #[must_use]
    pub fn project(&self, absolute: PagePosition) -> PagePosition {
        PagePosition::new(absolute.x - self.scroll.x, absolute.y - self.scroll.y)
    }

    /// Inclusive bounds check against the viewport grown by `margin`.
    #[must_use]
    pub fn contains(&self, relative: PagePosition, margin: f64) -> bool {
        relative.x >= -margin
            && relative.x <= self.width + margin
            && relative.y >= -margin
            && relative.y <= self.height + margin
    }
}

// =============================================================================
// MARKERS
// =============================================================================

/// One drawable remote cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorMarker {
    pub id: ParticipantId,
    /// Viewport-relative.
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub emoji: &'static str,
    pub label: String,
}

/// Markers for every visible record that lands on screen, ordered by id.
#[must_use]
pub fn render(visible: &BTreeMap<ParticipantId, CursorRecord>, viewport: &Viewport, margin: f64) -> Vec<CursorMarker> {
    visible
        .iter()
        .filter_map(|(id, record)| {
            let relative = viewport.project(record.position());
            if !viewport.contains(relative, margin) {
                return None;
            }
            Some(CursorMarker {
                id: id.clone(),
                x: relative.x,
                y: relative.y,
                color: visual::cursor_color(id.as_str()),
                emoji: visual::cursor_emoji(id.as_str()),
                label: visual::cursor_label(id.as_str()),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
