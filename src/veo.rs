//! Reconstruction of the overlay-type (Veo) watermark region.
//!
//! Unlike the Gemini watermark there is no known compositing formula to
//! invert, so the region is synthesized instead: either copied from the
//! equally-sized strip directly above it (static backgrounds) or rebuilt by
//! inpainting the presumed glyph pixels (dynamic backgrounds). Which path runs
//! is a brightness heuristic, not a strict state machine.

use image::RgbImage;

use crate::position::OverlayRegion;

/// Tuning knobs for the overlay reconstruction.
#[derive(Debug, Clone)]
pub struct VeoParams {
    /// Feather width for the top/left edges of a copied strip, in pixels.
    pub feather: u32,
    /// Columns of context compared by the seam guard.
    pub seam_context: u32,
    /// Maximum mean-brightness difference the seam guard tolerates.
    pub seam_max_diff: f32,
    /// Percentile of the target region used as the background estimate.
    pub background_percentile: f32,
    /// Brightness-difference floor for classifying the background as dynamic.
    pub dynamic_diff_floor: f32,
    /// Brightness-difference factor (of the background estimate) for dynamic.
    pub dynamic_diff_factor: f32,
    /// Brightness-over-background floor for glyph mask pixels.
    pub mask_diff_floor: f32,
    /// Brightness-over-background factor for glyph mask pixels.
    pub mask_diff_factor: f32,
    /// Padding around the target rectangle handed to the inpainter.
    pub inpaint_padding: u32,
}

impl Default for VeoParams {
    fn default() -> Self {
        Self {
            feather: 5,
            seam_context: 5,
            seam_max_diff: 7.0,
            background_percentile: 0.3,
            dynamic_diff_floor: 15.0,
            dynamic_diff_factor: 0.5,
            mask_diff_floor: 30.0,
            mask_diff_factor: 0.5,
            inpaint_padding: 8,
        }
    }
}

/// Which synthesis strategy fits the local background.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Reconstruction {
    /// Background is flat enough to copy the strip above the region.
    CopyAbove,
    /// Background varies; inpaint the glyph pixels instead.
    Inpaint {
        /// Estimated local background brightness.
        background: f32,
    },
}

/// Classify the region background from the source-strip mean brightness and
/// the target's background estimate.
fn classify_background(source_mean: f32, background: f32, params: &VeoParams) -> Reconstruction {
    let limit = params
        .dynamic_diff_floor
        .max(background * params.dynamic_diff_factor);
    if (source_mean - background).abs() > limit {
        Reconstruction::Inpaint { background }
    } else {
        Reconstruction::CopyAbove
    }
}

/// Rec.601 luminance of a rectangle, row-major, in `[0, 255]`.
fn region_to_grayscale(img: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> Vec<f32> {
    let mut gray = Vec::with_capacity((w * h) as usize);
    for dy in 0..h {
        for dx in 0..w {
            let px = img.get_pixel(x + dx, y + dy);
            gray.push(
                0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]),
            );
        }
    }
    gray
}

fn mean(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = data.len() as f32;
    data.iter().sum::<f32>() / n
}

/// Value at the given percentile (nearest-rank over a sorted copy).
fn percentile(data: &[f32], p: f32) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f32::total_cmp);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (((sorted.len() - 1) as f32) * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx]
}

/// Reconstruct the overlay watermark region in place.
///
/// Returns `true` if pixels were modified. Skips silently (returning `false`)
/// when the box does not fit the frame, when there is no full-height sample
/// strip above it, when the seam guard rejects a copy, or when no glyph
/// pixels are found to inpaint.
///
/// Never writes outside `[x, x+w) x [y, y+h)`.
pub fn remove_overlay(image: &mut RgbImage, region: &OverlayRegion, params: &VeoParams) -> bool {
    let img_w = i64::from(image.width());
    let img_h = i64::from(image.height());
    let (w, h) = (region.width, region.height);
    if w == 0
        || h == 0
        || region.x < 0
        || region.y < 0
        || region.x + i64::from(w) > img_w
        || region.y + i64::from(h) > img_h
    {
        return false;
    }
    // The sample strip sits directly above the region and must fit entirely.
    if region.y < i64::from(h) {
        return false;
    }

    #[allow(clippy::cast_sign_loss)]
    let (x0, y0) = (region.x as u32, region.y as u32);

    let target_gray = region_to_grayscale(image, x0, y0, w, h);
    let source_gray = region_to_grayscale(image, x0, y0 - h, w, h);
    let background = percentile(&target_gray, params.background_percentile);

    match classify_background(mean(&source_gray), background, params) {
        Reconstruction::CopyAbove => copy_above(image, x0, y0, w, h, &source_gray, params),
        Reconstruction::Inpaint { background } => {
            inpaint_glyphs(image, x0, y0, w, h, &target_gray, background, params)
        }
    }
}

/// Static path: copy the strip above the region, feathering the top and left
/// edges. Bottom and right edges border the true watermark edge and are never
/// blended back in.
fn copy_above(
    image: &mut RgbImage,
    x0: u32,
    y0: u32,
    w: u32,
    h: u32,
    source_gray: &[f32],
    params: &VeoParams,
) -> bool {
    // Seam guard: the sampled strip must match the context to the left of the
    // target, or the copy would paint a visible rectangle.
    let ctx = params.seam_context;
    if x0 >= ctx {
        let left_context = region_to_grayscale(image, x0 - ctx, y0, ctx, h);
        let source_edge: Vec<f32> = (0..h)
            .flat_map(|dy| (0..ctx.min(w)).map(move |dx| (dy, dx)))
            .map(|(dy, dx)| source_gray[(dy * w + dx) as usize])
            .collect();
        if (mean(&source_edge) - mean(&left_context)).abs() > params.seam_max_diff {
            return false;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let f = params.feather.min(w).min(h).max(1) as f32;

    for dy in 0..h {
        for dx in 0..w {
            let copied = *image.get_pixel(x0 + dx, y0 - h + dy);
            #[allow(clippy::cast_precision_loss)]
            let row_t = (dy as f32 / f).min(1.0);
            #[allow(clippy::cast_precision_loss)]
            let col_t = (dx as f32 / f).min(1.0);
            let t = row_t.min(col_t);

            let px = image.get_pixel_mut(x0 + dx, y0 + dy);
            for ch in 0..3 {
                let blended = f32::from(px[ch]) * (1.0 - t) + f32::from(copied[ch]) * t;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    true
}

/// Dynamic path: mask pixels standing out above the background estimate,
/// dilate by one pixel, and inpaint them over a padded extension of the
/// target rectangle. Only the target sub-rectangle is written back.
#[allow(clippy::too_many_arguments)]
fn inpaint_glyphs(
    image: &mut RgbImage,
    x0: u32,
    y0: u32,
    w: u32,
    h: u32,
    target_gray: &[f32],
    background: f32,
    params: &VeoParams,
) -> bool {
    let limit = params.mask_diff_floor.max(background * params.mask_diff_factor);

    let mut mask = vec![false; (w * h) as usize];
    let mut any = false;
    for (i, &g) in target_gray.iter().enumerate() {
        if g > background + limit {
            mask[i] = true;
            any = true;
        }
    }
    if !any {
        return false;
    }

    // Dilate by one pixel in each direction.
    let mut dilated = mask.clone();
    for dy in 0..h as i64 {
        for dx in 0..w as i64 {
            if mask[(dy * i64::from(w) + dx) as usize] {
                for ny in (dy - 1).max(0)..=(dy + 1).min(i64::from(h) - 1) {
                    for nx in (dx - 1).max(0)..=(dx + 1).min(i64::from(w) - 1) {
                        dilated[(ny * i64::from(w) + nx) as usize] = true;
                    }
                }
            }
        }
    }

    // Work over a padded extension so the fill can draw on surrounding pixels.
    let pad = params.inpaint_padding;
    let px0 = x0.saturating_sub(pad);
    let py0 = y0.saturating_sub(pad);
    let px1 = (x0 + w + pad).min(image.width());
    let py1 = (y0 + h + pad).min(image.height());
    let (pw, ph) = (px1 - px0, py1 - py0);

    let mut patch = vec![0.0_f32; (pw * ph * 3) as usize];
    for dy in 0..ph {
        for dx in 0..pw {
            let px = image.get_pixel(px0 + dx, py0 + dy);
            let base = ((dy * pw + dx) * 3) as usize;
            patch[base] = f32::from(px[0]);
            patch[base + 1] = f32::from(px[1]);
            patch[base + 2] = f32::from(px[2]);
        }
    }

    let mut patch_mask = vec![false; (pw * ph) as usize];
    for dy in 0..h {
        for dx in 0..w {
            if dilated[(dy * w + dx) as usize] {
                let py = y0 + dy - py0;
                let px = x0 + dx - px0;
                patch_mask[(py * pw + px) as usize] = true;
            }
        }
    }

    fill_masked(&mut patch, &mut patch_mask, pw as usize, ph as usize);

    // Write back only the target sub-rectangle.
    for dy in 0..h {
        for dx in 0..w {
            if !dilated[(dy * w + dx) as usize] {
                continue;
            }
            let py = y0 + dy - py0;
            let pxx = x0 + dx - px0;
            let base = ((py * pw + pxx) * 3) as usize;
            let px = image.get_pixel_mut(x0 + dx, y0 + dy);
            for ch in 0..3 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = patch[base + ch].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    true
}

/// Fast-marching-style fill: masked pixels are resolved boundary-inward, each
/// from the distance-weighted average of its already-known 8-neighbors.
fn fill_masked(rgb: &mut [f32], mask: &mut [bool], w: usize, h: usize) {
    const ORTHO: f32 = 1.0;
    const DIAG: f32 = std::f32::consts::FRAC_1_SQRT_2;

    loop {
        let mut layer: Vec<(usize, [f32; 3])> = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let idx = y * w + x;
                if !mask[idx] {
                    continue;
                }
                let mut acc = [0.0_f32; 3];
                let mut weight = 0.0_f32;
                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let nidx = ny * w + nx;
                        if nidx == idx || mask[nidx] {
                            continue;
                        }
                        let wgt = if ny == y || nx == x { ORTHO } else { DIAG };
                        for ch in 0..3 {
                            acc[ch] += rgb[nidx * 3 + ch] * wgt;
                        }
                        weight += wgt;
                    }
                }
                if weight > 0.0 {
                    layer.push((idx, [acc[0] / weight, acc[1] / weight, acc[2] / weight]));
                }
            }
        }

        if layer.is_empty() {
            break;
        }
        for (idx, value) in layer {
            rgb[idx * 3] = value[0];
            rgb[idx * 3 + 1] = value[1];
            rgb[idx * 3 + 2] = value[2];
            mask[idx] = false;
        }
    }
}
