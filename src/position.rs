//! Watermark layout rules.
//!
//! Both watermarks sit in the bottom-right corner at positions derived purely
//! from frame dimensions. The functions here never fail: a frame too small for
//! a watermark yields a box that falls (partly) outside the frame, and every
//! consumer bounds-checks before touching pixels.

/// Gemini watermark size classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatermarkSize {
    /// 48x48 watermark, 32px margin (both dimensions <= 1024).
    Small,
    /// 96x96 watermark, 64px margin (either dimension > 1024).
    Large,
}

impl WatermarkSize {
    /// Side length of the square watermark box in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            Self::Small => 48,
            Self::Large => 96,
        }
    }

    /// Margin between the watermark box and the frame edges.
    #[must_use]
    pub const fn margin(self) -> u32 {
        match self {
            Self::Small => 32,
            Self::Large => 64,
        }
    }
}

/// Dimension above which the large watermark is used.
const LARGE_FRAME_THRESHOLD: u32 = 1024;

/// Nominal width of the Veo text overlay box.
const VEO_WIDTH: u32 = 100;
/// Nominal height of the Veo text overlay box.
const VEO_HEIGHT: u32 = 45;
/// Horizontal margin as a fraction of frame width.
const VEO_MARGIN_X_RATIO: f64 = 0.025;
/// Vertical margin as a fraction of frame height.
const VEO_MARGIN_Y_RATIO: f64 = 0.015;
/// Minimum margin in pixels, both axes.
const VEO_MIN_MARGIN: i64 = 15;

/// Bounding box of the blend-type (Gemini) watermark.
///
/// Coordinates are signed: frames smaller than `margin + size` place the box
/// at negative coordinates, which consumers treat as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendRegion {
    /// X of the top-left corner.
    pub x: i64,
    /// Y of the top-left corner.
    pub y: i64,
    /// Box width in pixels (equals the size's side length).
    pub width: u32,
    /// Box height in pixels (equals the size's side length).
    pub height: u32,
    /// Size key selecting the matching opacity map.
    pub size: WatermarkSize,
}

/// Bounding box of the overlay-type (Veo) watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRegion {
    /// X of the top-left corner.
    pub x: i64,
    /// Y of the top-left corner.
    pub y: i64,
    /// Box width in pixels.
    pub width: u32,
    /// Box height in pixels.
    pub height: u32,
}

/// Classify the Gemini watermark size for a frame.
///
/// Large when *either* dimension exceeds 1024; 1024x1024 itself is small.
#[must_use]
pub fn watermark_size_for(width: u32, height: u32) -> WatermarkSize {
    if width > LARGE_FRAME_THRESHOLD || height > LARGE_FRAME_THRESHOLD {
        WatermarkSize::Large
    } else {
        WatermarkSize::Small
    }
}

/// Compute the Gemini watermark box for a frame.
#[must_use]
pub fn blend_region(width: u32, height: u32) -> BlendRegion {
    let size = watermark_size_for(width, height);
    let side = i64::from(size.pixels());
    let margin = i64::from(size.margin());

    BlendRegion {
        x: i64::from(width) - margin - side,
        y: i64::from(height) - margin - side,
        width: size.pixels(),
        height: size.pixels(),
        size,
    }
}

/// Compute the Veo overlay box for a frame.
///
/// Fixed 100x45 nominal box, ratio-based margins with a 15px floor, then
/// clamped so the box never extends past the frame and never starts before 0.
#[must_use]
pub fn overlay_region(width: u32, height: u32) -> OverlayRegion {
    #[allow(clippy::cast_possible_truncation)]
    let margin_x = VEO_MIN_MARGIN.max((f64::from(width) * VEO_MARGIN_X_RATIO).round() as i64);
    #[allow(clippy::cast_possible_truncation)]
    let margin_y = VEO_MIN_MARGIN.max((f64::from(height) * VEO_MARGIN_Y_RATIO).round() as i64);

    let mut x = i64::from(width) - margin_x - i64::from(VEO_WIDTH);
    let mut y = i64::from(height) - margin_y - i64::from(VEO_HEIGHT);

    // Margins may push the box out of small frames; pull it back in.
    x = x.min(i64::from(width) - i64::from(VEO_WIDTH)).max(0);
    y = y.min(i64::from(height) - i64::from(VEO_HEIGHT)).max(0);

    OverlayRegion {
        x,
        y,
        width: VEO_WIDTH,
        height: VEO_HEIGHT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_boundary_is_exclusive_on_the_large_side() {
        assert_eq!(watermark_size_for(1024, 1024), WatermarkSize::Small);
        assert_eq!(watermark_size_for(1025, 1024), WatermarkSize::Large);
        assert_eq!(watermark_size_for(1024, 1025), WatermarkSize::Large);
        assert_eq!(watermark_size_for(800, 600), WatermarkSize::Small);
        assert_eq!(watermark_size_for(2048, 512), WatermarkSize::Large);
    }

    #[test]
    fn blend_region_sits_in_bottom_right_corner() {
        let r = blend_region(1920, 1080);
        assert_eq!(r.size, WatermarkSize::Large);
        assert_eq!(r.width, 96);
        assert_eq!(r.x, 1920 - 64 - 96);
        assert_eq!(r.y, 1080 - 64 - 96);

        let r = blend_region(800, 600);
        assert_eq!(r.size, WatermarkSize::Small);
        assert_eq!(r.x, 800 - 32 - 48);
        assert_eq!(r.y, 600 - 32 - 48);
    }

    #[test]
    fn blend_region_goes_negative_for_tiny_frames() {
        let r = blend_region(50, 50);
        assert!(r.x < 0);
        assert!(r.y < 0);
    }

    #[test]
    fn overlay_region_uses_ratio_margins_on_large_frames() {
        let r = overlay_region(1920, 1080);
        assert_eq!(r.width, 100);
        assert_eq!(r.height, 45);
        // 1920 * 0.025 = 48, 1080 * 0.015 = 16.2 -> 16
        assert_eq!(r.x, 1920 - 48 - 100);
        assert_eq!(r.y, 1080 - 16 - 45);
    }

    #[test]
    fn overlay_region_uses_minimum_margins_on_small_frames() {
        let r = overlay_region(400, 300);
        // 400 * 0.025 = 10 -> floor 15; 300 * 0.015 = 4.5 -> floor 15
        assert_eq!(r.x, 400 - 15 - 100);
        assert_eq!(r.y, 300 - 15 - 45);
    }

    #[test]
    fn overlay_region_is_clamped_into_tiny_frames() {
        let r = overlay_region(110, 50);
        assert_eq!(r.x, 110 - 100);
        assert_eq!(r.y, 50 - 45);

        // Frame smaller than the nominal box: floored at 0.
        let r = overlay_region(80, 30);
        assert_eq!(r.x, 0);
        assert_eq!(r.y, 0);
    }
}
