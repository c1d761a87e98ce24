//! Annotation capture: text selections to highlights.
//!
//! # Responsibility
//! - Turn a selection reported by the rendering surface plus a note body into
//!   a [`Highlight`] with a session-unique id and palette color.
//! - Resolve `jump_to` requests back onto the rendering surface.
//!
//! # Invariants
//! - Ids increase monotonically from 1 and are never reused in a session.
//! - Color is `palette[id % palette.len()]`.
//! - A blank note or an empty selection cancels capture with no side effect.
//! - Jumping to a page that is not rendered is a no-op, not an error.

use crate::model::highlight::{Highlight, HighlightId, Region};
use log::debug;

/// Default highlight palette (amber, sky, rose, lime, violet).
pub const DEFAULT_PALETTE: [&str; 5] = ["#fde68a", "#bae6fd", "#fecdd3", "#d9f99d", "#ddd6fe"];

/// Selection gesture reported by the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub selection_regions: Vec<Region>,
    pub selected_text: String,
}

/// Commands the capture component sends back to the rendering surface.
pub trait RenderSurface {
    fn is_page_rendered(&self, page_index: u32) -> bool;
    fn scroll_to(&mut self, page_index: u32, region: &Region);
}

/// Result of a `jump_to` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    Scrolled { page_index: u32 },
    PageNotRendered { page_index: u32 },
    UnknownHighlight,
}

type HighlightCallback = Box<dyn FnMut(&Highlight) + Send>;

/// Session-local highlight list with id and color assignment.
pub struct HighlightCapture {
    palette: Vec<String>,
    highlights: Vec<Highlight>,
    last_id: HighlightId,
    on_highlight: Option<HighlightCallback>,
}

impl HighlightCapture {
    /// Creates a capture component; an empty palette falls back to
    /// [`DEFAULT_PALETTE`].
    pub fn new(palette: Vec<String>) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
        } else {
            palette
        };
        Self {
            palette,
            highlights: Vec::new(),
            last_id: 0,
            on_highlight: None,
        }
    }

    /// Registers the callback invoked after each captured highlight.
    pub fn with_callback(mut self, callback: impl FnMut(&Highlight) + Send + 'static) -> Self {
        self.on_highlight = Some(Box::new(callback));
        self
    }

    /// Captures one highlight, or returns `None` when cancelled.
    pub fn capture(&mut self, selection: SelectionEvent, note: &str) -> Option<Highlight> {
        let content = note.trim();
        let areas: Vec<Region> = selection
            .selection_regions
            .into_iter()
            .map(Region::clamped)
            .filter(|region| !region.is_empty())
            .collect();
        if content.is_empty() || areas.is_empty() {
            debug!(
                "event=highlight_capture module=capture status=skip blank_note={} regions={}",
                content.is_empty(),
                areas.len()
            );
            return None;
        }

        self.last_id += 1;
        let id = self.last_id;
        let highlight = Highlight {
            id,
            quote: selection.selected_text,
            content: content.to_string(),
            highlight_areas: areas,
            color: self.color_for(id).to_string(),
        };
        self.highlights.push(highlight.clone());
        debug!(
            "event=highlight_capture module=capture status=ok highlight_id={} regions={}",
            id,
            highlight.highlight_areas.len()
        );

        if let Some(callback) = self.on_highlight.as_mut() {
            callback(&highlight);
        }
        Some(highlight)
    }

    /// Scrolls the surface to the first region of a highlight.
    pub fn jump_to(
        &self,
        highlight_id: HighlightId,
        surface: &mut impl RenderSurface,
    ) -> JumpOutcome {
        let Some(region) = self
            .get(highlight_id)
            .and_then(|highlight| highlight.primary_region())
        else {
            return JumpOutcome::UnknownHighlight;
        };

        if !surface.is_page_rendered(region.page_index) {
            return JumpOutcome::PageNotRendered {
                page_index: region.page_index,
            };
        }
        surface.scroll_to(region.page_index, region);
        JumpOutcome::Scrolled {
            page_index: region.page_index,
        }
    }

    pub fn get(&self, highlight_id: HighlightId) -> Option<&Highlight> {
        self.highlights.iter().find(|h| h.id == highlight_id)
    }

    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn color_for(&self, id: HighlightId) -> &str {
        let index = (id % self.palette.len() as u64) as usize;
        &self.palette[index]
    }
}

impl Default for HighlightCapture {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
