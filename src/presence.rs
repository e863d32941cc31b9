//! Statistical presence test for the blend-type watermark.
//!
//! Guards the reverse blend against corrupting images that were never
//! watermarked. The test is a heuristic, not a proof: a white watermark
//! composited through the opacity map must leave high-opacity cells markedly
//! brighter than low-opacity cells, and near-opaque cells close to white.
//! False negatives (skipping a real watermark) are preferred over false
//! positives (corrupting a clean image).

use image::RgbImage;

use crate::alpha_map::AlphaMap;

/// Thresholds for the presence test.
///
/// The expected-diff factor and whiteness floor are empirically tuned
/// constants carried over from the reverse-engineered embedding scheme; they
/// have no stated derivation and are kept configurable rather than hard-coded.
#[derive(Debug, Clone)]
pub struct PresenceParams {
    /// Opacity at or above which a cell belongs to the "high" set.
    pub high_opacity_min: f32,
    /// Opacity below which a cell belongs to the "low" set.
    pub low_opacity_max: f32,
    /// Fraction of the theoretical brightness difference that must be seen.
    pub expected_diff_factor: f32,
    /// Opacity at or above which a cell belongs to the near-opaque core.
    pub core_opacity_min: f32,
    /// Minimum mean brightness of the near-opaque core (white logo).
    pub whiteness_floor: f32,
}

impl Default for PresenceParams {
    fn default() -> Self {
        Self {
            high_opacity_min: 0.1,
            low_opacity_max: 0.05,
            expected_diff_factor: 0.7,
            core_opacity_min: 0.5,
            whiteness_floor: 220.0,
        }
    }
}

/// Mean brightness (channel mean) of the pixels selected by `pred` over the
/// opacity grid, together with the mean opacity of the selected cells.
fn masked_means(
    image: &RgbImage,
    x0: u32,
    y0: u32,
    alpha: &AlphaMap,
    pred: impl Fn(f32) -> bool,
) -> Option<(f32, f32)> {
    let mut brightness_sum = 0.0_f32;
    let mut opacity_sum = 0.0_f32;
    let mut count = 0u32;

    for dy in 0..alpha.height() {
        for dx in 0..alpha.width() {
            let a = alpha.get(dx, dy);
            if !pred(a) {
                continue;
            }
            let px = image.get_pixel(x0 + dx, y0 + dy);
            brightness_sum +=
                (f32::from(px[0]) + f32::from(px[1]) + f32::from(px[2])) / 3.0;
            opacity_sum += a;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = count as f32;
    Some((brightness_sum / n, opacity_sum / n))
}

/// Decide whether the blend-type watermark is actually present.
///
/// `(x0, y0)` is the top-left corner of the watermark box, which must lie
/// fully inside the image and match the opacity map's dimensions.
///
/// The test reports *present* only when both hold:
/// 1. High-opacity cells are brighter than low-opacity cells by at least
///    `mean_high_opacity * 255 * expected_diff_factor`.
/// 2. Near-opaque cells (if any) average at least the whiteness floor.
#[must_use]
pub fn watermark_present(
    image: &RgbImage,
    x0: u32,
    y0: u32,
    alpha: &AlphaMap,
    params: &PresenceParams,
) -> bool {
    let Some((high_brightness, high_opacity)) =
        masked_means(image, x0, y0, alpha, |a| a >= params.high_opacity_min)
    else {
        return false;
    };
    let Some((low_brightness, _)) =
        masked_means(image, x0, y0, alpha, |a| a < params.low_opacity_max)
    else {
        return false;
    };

    let diff = high_brightness - low_brightness;
    let expected_diff = high_opacity * 255.0 * params.expected_diff_factor;
    if diff < expected_diff {
        return false;
    }

    // Near-opaque cells of a white logo must read near-white.
    if let Some((core_brightness, _)) =
        masked_means(image, x0, y0, alpha, |a| a >= params.core_opacity_min)
    {
        if core_brightness < params.whiteness_floor {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8x8 map: 4x4 near-opaque core in the middle, transparent border.
    fn test_map() -> AlphaMap {
        let mut values = vec![0.0_f32; 64];
        for y in 2..6 {
            for x in 2..6 {
                values[y * 8 + x] = 0.9;
            }
        }
        AlphaMap::from_raw(8, 8, values)
    }

    /// Paint the forward blend of a white logo over a uniform background.
    fn watermarked_image(base: u8, alpha: &AlphaMap) -> RgbImage {
        let mut img = RgbImage::from_pixel(8, 8, image::Rgb([base, base, base]));
        for y in 0..8 {
            for x in 0..8 {
                let a = alpha.get(x, y);
                let blended = f32::from(base) * (1.0 - a) + 255.0 * a;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let v = blended.clamp(0.0, 255.0) as u8;
                img.put_pixel(x, y, image::Rgb([v, v, v]));
            }
        }
        img
    }

    #[test]
    fn forward_blended_watermark_is_detected() {
        let map = test_map();
        let img = watermarked_image(20, &map);
        assert!(watermark_present(&img, 0, 0, &map, &PresenceParams::default()));
    }

    #[test]
    fn uniform_region_is_not_present() {
        // Zero opacity contrast: every pixel equally bright.
        let map = test_map();
        let img = RgbImage::from_pixel(8, 8, image::Rgb([128, 128, 128]));
        assert!(!watermark_present(&img, 0, 0, &map, &PresenceParams::default()));
    }

    #[test]
    fn not_present_when_a_partition_is_empty() {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200]));

        // All-high map: low set empty.
        let all_high = AlphaMap::from_raw(8, 8, vec![0.9; 64]);
        assert!(!watermark_present(&img, 0, 0, &all_high, &PresenceParams::default()));

        // All-low map: high set empty.
        let all_low = AlphaMap::from_raw(8, 8, vec![0.01; 64]);
        assert!(!watermark_present(&img, 0, 0, &all_low, &PresenceParams::default()));
    }

    #[test]
    fn dark_core_fails_whiteness_check() {
        let map = test_map();
        // Bright-ish core but nowhere near white: brightness diff may pass,
        // the whiteness floor must still reject it.
        let mut img = RgbImage::from_pixel(8, 8, image::Rgb([10, 10, 10]));
        for y in 2..6 {
            for x in 2..6 {
                img.put_pixel(x, y, image::Rgb([180, 180, 180]));
            }
        }
        assert!(!watermark_present(&img, 0, 0, &map, &PresenceParams::default()));
    }
}
