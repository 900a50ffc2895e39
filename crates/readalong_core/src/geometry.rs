//! crates/readalong_core/src/geometry.rs
//!
//! Rectangle math for reconciling OCR coordinates with the displayed image.
//!
//! Vision providers report coordinates in the stored (pre-rotation) pixel
//! frame, while the UI renders the image after applying its EXIF
//! orientation. Block rectangles are always persisted in the displayed
//! frame, so every provider rectangle passes through [`Rect::to_displayed`]
//! before it leaves the vision adapter.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The subset of EXIF orientation codes produced by phone cameras.
/// Mirrored/transposed codes (2, 4, 5, 7) do not occur in practice for
/// photographs and are treated as `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    Rotated180,
    /// EXIF 6: the stored image must be rotated 90° clockwise for display.
    Rotated90Cw,
    /// EXIF 8: the stored image must be rotated 90° counter-clockwise.
    Rotated90Ccw,
}

impl Orientation {
    pub fn from_exif(code: u32) -> Self {
        match code {
            3 => Orientation::Rotated180,
            6 => Orientation::Rotated90Cw,
            8 => Orientation::Rotated90Ccw,
            _ => Orientation::Normal,
        }
    }

    /// Displayed `(width, height)` of an image stored as `(w, h)`.
    pub fn displayed_dimensions(&self, w: f64, h: f64) -> (f64, f64) {
        match self {
            Orientation::Normal | Orientation::Rotated180 => (w, h),
            Orientation::Rotated90Cw | Orientation::Rotated90Ccw => (h, w),
        }
    }
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rewrites a rectangle from the stored frame `(stored_w, stored_h)`
    /// into the displayed frame for the given orientation.
    ///
    /// The 90° CCW case uses the true inverse of the CW case rather than
    /// repeating the CW transform for both codes as some OCR pipelines do;
    /// the round-trip test below pins that choice.
    pub fn to_displayed(&self, orientation: Orientation, stored_w: f64, stored_h: f64) -> Rect {
        let (x, y, w, h) = (self.x, self.y, self.width, self.height);
        match orientation {
            Orientation::Normal => *self,
            Orientation::Rotated180 => Rect::new(stored_w - x - w, stored_h - y - h, w, h),
            Orientation::Rotated90Cw => Rect::new(stored_h - y - h, x, h, w),
            Orientation::Rotated90Ccw => Rect::new(y, stored_w - x - w, h, w),
        }
    }

    /// Clamps the rectangle into `[0, bound_w] x [0, bound_h]`, shrinking
    /// width/height as needed. Degenerate rectangles collapse to zero size.
    pub fn clip_to_bounds(&self, bound_w: f64, bound_h: f64) -> Rect {
        let x = self.x.max(0.0).min(bound_w);
        let y = self.y.max(0.0).min(bound_h);
        let width = (self.x + self.width).min(bound_w) - x;
        let height = (self.y + self.height).min(bound_h) - y;
        Rect::new(x, y, width.max(0.0), height.max(0.0))
    }

    /// Whether the rectangle lies entirely inside `[0, bound_w] x [0, bound_h]`.
    pub fn within_bounds(&self, bound_w: f64, bound_h: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= bound_w
            && self.y + self.height <= bound_h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_orientation_leaves_rect_untouched() {
        let r = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(r.to_displayed(Orientation::Normal, 100.0, 200.0), r);
    }

    #[test]
    fn rotation_180_twice_is_identity() {
        let r = Rect::new(13.0, 27.0, 31.0, 45.0);
        let once = r.to_displayed(Orientation::Rotated180, 100.0, 200.0);
        let twice = once.to_displayed(Orientation::Rotated180, 100.0, 200.0);
        assert_eq!(twice, r);
    }

    #[test]
    fn rotation_cw_matches_portrait_phone_example() {
        // Stored 2000x3000 with EXIF 6 displays as 3000x2000; a provider
        // rect at (100, 200, 300, 400) must land at (2400, 100, 400, 300).
        let r = Rect::new(100.0, 200.0, 300.0, 400.0);
        let displayed = r.to_displayed(Orientation::Rotated90Cw, 2000.0, 3000.0);
        assert_eq!(displayed, Rect::new(2400.0, 100.0, 400.0, 300.0));
    }

    #[test]
    fn rotation_ccw_inverts_rotation_cw() {
        // CW into the displayed frame (H x W), then CCW with the swapped
        // dimensions, must restore the original stored-frame rectangle.
        let (w, h) = (2000.0, 3000.0);
        let r = Rect::new(100.0, 200.0, 300.0, 400.0);
        let cw = r.to_displayed(Orientation::Rotated90Cw, w, h);
        let back = cw.to_displayed(Orientation::Rotated90Ccw, h, w);
        assert_eq!(back, r);
    }

    #[test]
    fn rotation_ccw_diverges_from_cw() {
        // Guards against regressing to the shared-transform bug where
        // orientations 6 and 8 were rewritten identically.
        let r = Rect::new(100.0, 200.0, 300.0, 400.0);
        let cw = r.to_displayed(Orientation::Rotated90Cw, 2000.0, 3000.0);
        let ccw = r.to_displayed(Orientation::Rotated90Ccw, 2000.0, 3000.0);
        assert_ne!(cw, ccw);
        assert_eq!(ccw, Rect::new(200.0, 1600.0, 400.0, 300.0));
    }

    #[test]
    fn displayed_dimensions_swap_on_quarter_turns() {
        assert_eq!(
            Orientation::Rotated90Cw.displayed_dimensions(2000.0, 3000.0),
            (3000.0, 2000.0)
        );
        assert_eq!(
            Orientation::Rotated180.displayed_dimensions(2000.0, 3000.0),
            (2000.0, 3000.0)
        );
    }

    #[test]
    fn clip_shrinks_overflowing_rect() {
        let r = Rect::new(-10.0, 50.0, 200.0, 100.0).clip_to_bounds(100.0, 120.0);
        assert_eq!(r, Rect::new(0.0, 50.0, 100.0, 70.0));
        assert!(r.within_bounds(100.0, 120.0));
    }

    #[test]
    fn clip_collapses_fully_outside_rect() {
        let r = Rect::new(500.0, 500.0, 50.0, 50.0).clip_to_bounds(100.0, 100.0);
        assert_eq!(r.width, 0.0);
        assert_eq!(r.height, 0.0);
    }
}
