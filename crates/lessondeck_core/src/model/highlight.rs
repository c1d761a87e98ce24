//! Highlight and page-region model.
//!
//! # Responsibility
//! - Describe annotated document regions independent of render scale.
//! - Convert between page-relative percentages and pixel rectangles.
//!
//! # Invariants
//! - `Region` geometry is stored as percentages (0..=100) of page size.
//! - Highlight ids are assigned by capture and never reused in a session.

use serde::{Deserialize, Serialize};

/// Session-local highlight identifier.
pub type HighlightId = u64;

/// Page size in rendered pixels at the current zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Returns this page size at another zoom factor.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Pixel rectangle relative to the page's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Highlighted page area in page-relative percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub page_index: u32,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(page_index: u32, left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            page_index,
            left,
            top,
            width,
            height,
        }
    }

    /// Builds a region from a pixel rectangle measured on a rendered page.
    ///
    /// Returns `None` when the page has no measurable area.
    pub fn from_pixels(page_index: u32, rect: PixelRect, page: PageSize) -> Option<Self> {
        let measurable = |side: f64| side.is_finite() && side > 0.0;
        if !measurable(page.width) || !measurable(page.height) {
            return None;
        }
        Some(
            Self {
                page_index,
                left: rect.x / page.width * 100.0,
                top: rect.y / page.height * 100.0,
                width: rect.width / page.width * 100.0,
                height: rect.height / page.height * 100.0,
            }
            .clamped(),
        )
    }

    /// Projects this region onto a page rendered at `page` pixel size.
    pub fn to_pixels(&self, page: PageSize) -> PixelRect {
        PixelRect {
            x: self.left / 100.0 * page.width,
            y: self.top / 100.0 * page.height,
            width: self.width / 100.0 * page.width,
            height: self.height / 100.0 * page.height,
        }
    }

    /// Clamps geometry into the page bounds. Non-finite geometry collapses
    /// to an empty region.
    pub fn clamped(self) -> Self {
        if !self.is_finite() {
            return Self::new(self.page_index, 0.0, 0.0, 0.0, 0.0);
        }
        let left = self.left.clamp(0.0, 100.0);
        let top = self.top.clamp(0.0, 100.0);
        Self {
            page_index: self.page_index,
            left,
            top,
            width: self.width.clamp(0.0, 100.0 - left),
            height: self.height.clamp(0.0, 100.0 - top),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.is_finite() || self.width <= 0.0 || self.height <= 0.0
    }

    fn is_finite(&self) -> bool {
        [self.left, self.top, self.width, self.height]
            .iter()
            .all(|value| value.is_finite())
    }
}

/// A captured highlight: quoted text, user note and page regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: HighlightId,
    pub quote: String,
    pub content: String,
    pub highlight_areas: Vec<Region>,
    pub color: String,
}

impl Highlight {
    /// First region used as the jump target.
    pub fn primary_region(&self) -> Option<&Region> {
        self.highlight_areas.first()
    }
}

#[cfg(test)]
mod tests {
    use super::{PageSize, PixelRect, Region};

    fn assert_close(left: f64, right: f64) {
        assert!((left - right).abs() < 1e-9, "{left} != {right}");
    }

    #[test]
    fn region_maps_to_same_visual_area_across_zoom_levels() {
        let base = PageSize::new(600.0, 800.0);
        let rect = PixelRect {
            x: 60.0,
            y: 200.0,
            width: 300.0,
            height: 40.0,
        };
        let region = Region::from_pixels(2, rect, base).unwrap();
        assert_close(region.left, 10.0);
        assert_close(region.top, 25.0);
        assert_close(region.width, 50.0);
        assert_close(region.height, 5.0);

        let zoomed = region.to_pixels(base.scaled(2.5));
        assert_close(zoomed.x, rect.x * 2.5);
        assert_close(zoomed.y, rect.y * 2.5);
        assert_close(zoomed.width, rect.width * 2.5);
        assert_close(zoomed.height, rect.height * 2.5);

        let recaptured = Region::from_pixels(2, zoomed, base.scaled(2.5)).unwrap();
        assert_close(recaptured.left, region.left);
        assert_close(recaptured.width, region.width);
    }

    #[test]
    fn from_pixels_rejects_zero_sized_page() {
        let rect = PixelRect {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        };
        assert!(Region::from_pixels(0, rect, PageSize::new(0.0, 100.0)).is_none());
    }

    #[test]
    fn clamped_keeps_region_inside_page() {
        let region = Region::new(0, 90.0, -5.0, 30.0, 20.0).clamped();
        assert_close(region.left, 90.0);
        assert_close(region.top, 0.0);
        assert_close(region.width, 10.0);
        assert_close(region.height, 20.0);
    }

    #[test]
    fn non_finite_geometry_becomes_an_empty_region() {
        let region = Region::new(1, f64::NAN, 10.0, 20.0, 20.0).clamped();
        assert!(region.is_empty());
        assert_eq!(region.page_index, 1);
        assert!(Region::new(0, 0.0, f64::INFINITY, 5.0, 5.0).is_empty());

        let rect = PixelRect {
            x: f64::NAN,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let from_nan_rect = Region::from_pixels(0, rect, PageSize::new(100.0, 100.0)).unwrap();
        assert!(from_nan_rect.is_empty());
        assert!(Region::from_pixels(0, rect, PageSize::new(f64::NAN, 100.0)).is_none());
    }
}
