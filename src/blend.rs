//! Inverse alpha compositing for the blend-type watermark.
//!
//! The watermark is applied as `watermarked = original * (1 - a) + 255 * a`,
//! so the original is recovered as `original = (watermarked - 255a) / (1 - a)`
//! wherever the opacity map is known.

use image::RgbImage;

use crate::alpha_map::AlphaMap;
use crate::position::BlendRegion;
use crate::presence::{self, PresenceParams};

/// Opacity below which the watermark contribution is negligible noise.
const OPACITY_THRESHOLD: f32 = 0.002;

/// Upper opacity bound used as a divisor guard; never divide by `1 - a` for
/// `a` closer to 1 than this.
const MAX_OPACITY: f32 = 0.99;

/// White logo value composited by the embedding scheme.
const LOGO_VALUE: f32 = 255.0;

/// Reverse the alpha blend inside `region`, in place.
///
/// Returns `true` if pixels were modified. The buffer is left untouched when
/// the region does not fit the frame, or when the presence test decides no
/// watermark was ever applied there; both are expected outcomes, not errors.
/// Passing `None` for `params` skips the presence guard and reverses
/// unconditionally.
///
/// # Panics
///
/// Panics if the opacity map's dimensions differ from the region's.
pub fn reverse_blend(
    image: &mut RgbImage,
    alpha: &AlphaMap,
    region: &BlendRegion,
    params: Option<&PresenceParams>,
) -> bool {
    assert_eq!(alpha.width(), region.width, "opacity map / region mismatch");
    assert_eq!(alpha.height(), region.height, "opacity map / region mismatch");

    let img_w = i64::from(image.width());
    let img_h = i64::from(image.height());
    if region.x < 0
        || region.y < 0
        || region.x + i64::from(region.width) > img_w
        || region.y + i64::from(region.height) > img_h
    {
        return false;
    }

    #[allow(clippy::cast_sign_loss)]
    let (x0, y0) = (region.x as u32, region.y as u32);

    if let Some(params) = params {
        if !presence::watermark_present(image, x0, y0, alpha, params) {
            return false;
        }
    }

    for dy in 0..region.height {
        for dx in 0..region.width {
            let a = alpha.get(dx, dy);
            if a < OPACITY_THRESHOLD {
                continue;
            }
            let a = a.min(MAX_OPACITY);
            let inv = 1.0 - a;

            let px = image.get_pixel_mut(x0 + dx, y0 + dy);
            for ch in 0..3 {
                let watermarked = f32::from(px[ch]);
                let original = (watermarked - a * LOGO_VALUE) / inv;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = original.clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::WatermarkSize;

    fn region_at(x: i64, y: i64, side: u32) -> BlendRegion {
        BlendRegion {
            x,
            y,
            width: side,
            height: side,
            size: WatermarkSize::Small,
        }
    }

    /// Tiered map: transparent border, faint ring, near-opaque core. Shaped
    /// so both presence partitions are populated and the core reads as white
    /// after a forward blend over a dark background.
    fn tiered_map(side: u32) -> AlphaMap {
        let mut values = vec![0.0_f32; (side * side) as usize];
        for y in 1..side - 1 {
            for x in 1..side - 1 {
                values[(y * side + x) as usize] = 0.3;
            }
        }
        for y in side / 4..side - side / 4 {
            for x in side / 4..side - side / 4 {
                values[(y * side + x) as usize] = 0.9;
            }
        }
        AlphaMap::from_raw(side, side, values)
    }

    fn apply_forward(image: &mut RgbImage, alpha: &AlphaMap, x0: u32, y0: u32) {
        for dy in 0..alpha.height() {
            for dx in 0..alpha.width() {
                let a = alpha.get(dx, dy);
                if a < OPACITY_THRESHOLD {
                    continue;
                }
                let px = image.get_pixel_mut(x0 + dx, y0 + dy);
                for ch in 0..3 {
                    let orig = f32::from(px[ch]);
                    let blended = orig * (1.0 - a) + LOGO_VALUE * a;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        px[ch] = blended.clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
    }

    #[test]
    fn forward_then_inverse_recovers_original_in_float() {
        // Property over the opacity range: with an unquantized forward blend
        // the inverse is exact to well under one 8-bit step.
        for a_step in 0..100 {
            #[allow(clippy::cast_precision_loss)]
            let a = (a_step as f32) * 0.01;
            let a = a.min(MAX_OPACITY);
            for &o in &[0.0_f32, 1.0, 17.0, 128.0, 254.0, 255.0] {
                let w = o * (1.0 - a) + LOGO_VALUE * a;
                let recovered = (w - a * LOGO_VALUE) / (1.0 - a);
                assert!(
                    (recovered - o).abs() <= 1.0,
                    "a={a} o={o} recovered={recovered}"
                );
            }
        }
    }

    #[test]
    fn reverse_blend_recovers_watermarked_region() {
        let side = 16u32;
        let alpha = tiered_map(side);
        // Dark background keeps the inverse error small even at high opacity.
        let mut img = RgbImage::from_pixel(64, 64, image::Rgb([30, 20, 40]));
        let pristine = img.clone();

        apply_forward(&mut img, &alpha, 10, 10);
        let applied = reverse_blend(
            &mut img,
            &alpha,
            &region_at(10, 10, side),
            Some(&PresenceParams::default()),
        );
        assert!(applied, "watermark should be detected and reversed");

        for y in 0..64 {
            for x in 0..64 {
                let got = img.get_pixel(x, y);
                let want = pristine.get_pixel(x, y);
                for ch in 0..3 {
                    let diff = (i32::from(got[ch]) - i32::from(want[ch])).abs();
                    assert!(diff <= 6, "pixel ({x},{y}) ch {ch} diff {diff}");
                }
            }
        }
    }

    #[test]
    fn out_of_bounds_region_is_untouched() {
        let alpha = tiered_map(16);
        let mut img = RgbImage::from_pixel(32, 32, image::Rgb([50, 60, 70]));
        let pristine = img.clone();

        assert!(!reverse_blend(
            &mut img,
            &alpha,
            &region_at(-4, 2, 16),
            Some(&PresenceParams::default())
        ));
        assert!(!reverse_blend(
            &mut img,
            &alpha,
            &region_at(20, 20, 16),
            Some(&PresenceParams::default())
        ));
        assert_eq!(img, pristine);
    }

    #[test]
    fn clean_region_is_untouched() {
        let alpha = tiered_map(16);
        let mut img = RgbImage::from_pixel(64, 64, image::Rgb([90, 90, 90]));
        let pristine = img.clone();

        let applied = reverse_blend(
            &mut img,
            &alpha,
            &region_at(10, 10, 16),
            Some(&PresenceParams::default()),
        );
        assert!(!applied, "presence test must reject a clean image");
        assert_eq!(img, pristine);
    }
}
