//! Raw input events to absolute page positions.
//!
//! Pure observation: the sampler only remembers the scroll offset and the last
//! position it produced. Hosts feed it every input event in arrival order.

use serde::{Deserialize, Serialize};

use crate::record::PagePosition;

/// One touch contact. Page coordinates are optional because some hosts only
/// report viewport-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub client_x: f64,
    pub client_y: f64,
    pub page_x: Option<f64>,
    pub page_y: Option<f64>,
}

/// Host input signals consumed by the presence core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PointerMove {
        client_x: f64,
        client_y: f64,
        page_x: Option<f64>,
        page_y: Option<f64>,
    },
    TouchMove {
        touches: Vec<TouchPoint>,
    },
    Scroll {
        x: f64,
        y: f64,
    },
    VisibilityChange {
        hidden: bool,
    },
    Focus,
    Blur,
    BeforeUnload,
}

impl InputEvent {
    /// Pointer move that already carries document coordinates.
    #[must_use]
    pub fn pointer_at_page(x: f64, y: f64) -> Self {
        Self::PointerMove { client_x: x, client_y: y, page_x: Some(x), page_y: Some(y) }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PointerSampler {
    scroll: PagePosition,
    last: Option<PagePosition>,
}

impl PointerSampler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current window scroll offset as last reported.
    #[must_use]
    pub fn scroll_offset(&self) -> PagePosition {
        self.scroll
    }

    /// Last absolute position produced, if any pointer movement was seen.
    #[must_use]
    pub fn last_position(&self) -> Option<PagePosition> {
        self.last
    }

    /// Feed one event. Returns the current absolute position for pointer,
    /// touch and scroll events; scroll re-emits the previous position as-is.
    pub fn observe(&mut self, event: &InputEvent) -> Option<PagePosition> {
        match event {
            InputEvent::PointerMove { client_x, client_y, page_x, page_y } => {
                let position = self.absolute(*client_x, *client_y, *page_x, *page_y);
                self.last = Some(position);
                Some(position)
            }
            InputEvent::TouchMove { touches } => {
                let touch = touches.first()?;
                let position = self.absolute(touch.client_x, touch.client_y, touch.page_x, touch.page_y);
                self.last = Some(position);
                Some(position)
            }
            InputEvent::Scroll { x, y } => {
                self.scroll = PagePosition::new(*x, *y);
                self.last
            }
            InputEvent::VisibilityChange { .. } | InputEvent::Focus | InputEvent::Blur | InputEvent::BeforeUnload => {
                None
            }
        }
    }

    /// A zero or missing page coordinate falls back to client + scroll, per axis.
    fn absolute(&self, client_x: f64, client_y: f64, page_x: Option<f64>, page_y: Option<f64>) -> PagePosition {
        let x = page_x
            .filter(|v| *v != 0.0)
            .unwrap_or(client_x + self.scroll.x);
        let y = page_y
            .filter(|v| *v != 0.0)
            .unwrap_or(client_y + self.scroll.y);
        PagePosition::new(x, y)
    }
}

#[cfg(test)]
#[path = "pointer_test.rs"]
mod tests;
