//! Cross-frame stabilization of the reconstructed watermark regions.
//!
//! The per-frame pipeline is stateless, so residual reconstruction noise
//! flickers from frame to frame. A [`TemporalSession`] tracks the two
//! watermark boxes across consecutive frames of one video: it warps the
//! previous frame's reconstructed crops along the dense optical flow, blends
//! them with the current candidate, and clamps how far any pixel may move
//! from its temporally-predicted value. Scene cuts suspend smoothing so a cut
//! is never blended across.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::flow::{self, FlowField, FlowParams, Gray};
use crate::position::{self, BlendRegion, OverlayRegion};

/// Temporal smoothing parameters.
///
/// The per-pixel change clamp is an empirically tuned constant from the
/// source scheme, kept configurable.
#[derive(Debug, Clone)]
pub struct TemporalParams {
    /// Weight of the current candidate in the blend (rest goes to the warped
    /// previous crop).
    pub blend_alpha: f32,
    /// Maximum per-pixel, per-channel change versus the warped previous crop.
    pub max_change: f32,
    /// Mean flow magnitude above which a frame (or region) counts as a cut.
    pub scene_cut_threshold: f32,
    /// Absolute per-pixel flow ceiling; one pixel above this is a cut.
    pub max_flow_magnitude: f32,
}

impl Default for TemporalParams {
    fn default() -> Self {
        Self {
            blend_alpha: 0.7,
            max_change: 50.0,
            scene_cut_threshold: 8.0,
            max_flow_magnitude: 50.0,
        }
    }
}

/// A watermark box clipped to session geometry, `None` when it does not fit.
type Rect = Option<(u32, u32, u32, u32)>;

/// Everything remembered from the previous frame. Grouped in one struct so
/// the fields are either all present or all absent.
struct Baseline {
    gray: Gray,
    blend_crop: Option<RgbImage>,
    overlay_crop: Option<RgbImage>,
}

/// Per-video temporal consistency engine.
///
/// One instance per video; frames must be fed strictly in order. The first
/// frame fixes the session geometry and both watermark boxes; a later frame
/// with different dimensions is a terminal error.
pub struct TemporalSession {
    temporal: TemporalParams,
    flow_params: FlowParams,
    geometry: Option<(u32, u32)>,
    blend_rect: Rect,
    overlay_rect: Rect,
    baseline: Option<Baseline>,
    frame_count: u64,
}

impl TemporalSession {
    /// Create an idle session; the first `process_frame` call initializes it.
    #[must_use]
    pub fn new(temporal: TemporalParams, flow_params: FlowParams) -> Self {
        Self {
            temporal,
            flow_params,
            geometry: None,
            blend_rect: None,
            overlay_rect: None,
            baseline: None,
            frame_count: 0,
        }
    }

    /// Frames processed since creation or the last `reset`.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Stabilize one frame.
    ///
    /// `original` is the frame before watermark removal (flow is computed on
    /// it); `candidate` is the per-frame reconstruction result, consumed and
    /// returned possibly modified inside the two watermark boxes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameSizeMismatch`] if the frame dimensions differ
    /// from the session's first frame.
    pub fn process_frame(&mut self, original: &RgbImage, candidate: RgbImage) -> Result<RgbImage> {
        let dims = (original.width(), original.height());
        match self.geometry {
            None => self.init_geometry(dims.0, dims.1),
            Some(expected) if expected != dims => {
                return Err(Error::FrameSizeMismatch {
                    width: expected.0,
                    height: expected.1,
                    got_width: dims.0,
                    got_height: dims.1,
                });
            }
            Some(_) => {}
        }

        self.frame_count += 1;
        let curr_gray = Gray::from_rgb(original);

        let Some(baseline) = self.baseline.take() else {
            // Session start (or just reset): nothing to smooth against.
            self.store_baseline(curr_gray, &candidate);
            return Ok(candidate);
        };

        let field = flow::dense_flow(&baseline.gray, &curr_gray, &self.flow_params);
        Ok(self.apply(curr_gray, &field, &baseline, candidate))
    }

    /// Clear all stored state; the next call behaves as frame 1.
    pub fn reset(&mut self) {
        self.geometry = None;
        self.blend_rect = None;
        self.overlay_rect = None;
        self.baseline = None;
        self.frame_count = 0;
    }

    fn init_geometry(&mut self, width: u32, height: u32) {
        self.geometry = Some((width, height));
        let b = position::blend_region(width, height);
        let o = position::overlay_region(width, height);
        self.blend_rect = clip_blend(&b, width, height);
        self.overlay_rect = clip_overlay(&o, width, height);
    }

    /// Smooth the tracked regions given a precomputed flow field, then
    /// re-baseline. Split from `process_frame` so the flow can be synthetic.
    fn apply(
        &mut self,
        curr_gray: Gray,
        field: &FlowField,
        baseline: &Baseline,
        mut candidate: RgbImage,
    ) -> RgbImage {
        if flow::is_scene_cut(
            field,
            self.temporal.scene_cut_threshold,
            self.temporal.max_flow_magnitude,
        ) {
            // No smoothing across a cut; start over from this frame.
            self.store_baseline(curr_gray, &candidate);
            return candidate;
        }

        if let (Some(rect), Some(crop)) = (self.blend_rect, baseline.blend_crop.as_ref()) {
            self.stabilize_region(&mut candidate, field, rect, crop);
        }
        if let (Some(rect), Some(crop)) = (self.overlay_rect, baseline.overlay_crop.as_ref()) {
            self.stabilize_region(&mut candidate, field, rect, crop);
        }

        self.store_baseline(curr_gray, &candidate);
        candidate
    }

    fn stabilize_region(
        &self,
        candidate: &mut RgbImage,
        field: &FlowField,
        (x, y, w, h): (u32, u32, u32, u32),
        prev_crop: &RgbImage,
    ) {
        let local = field.window(x, y, w, h);
        // Local motion too extreme to trust: leave the candidate alone here.
        if local.mean_magnitude() > self.temporal.scene_cut_threshold {
            return;
        }

        let warped = flow::warp_rgb(prev_crop, &local);
        let alpha = self.temporal.blend_alpha;
        let clamp = self.temporal.max_change;

        for dy in 0..h {
            for dx in 0..w {
                let base = ((dy * w + dx) * 3) as usize;
                let px = candidate.get_pixel_mut(x + dx, y + dy);
                for ch in 0..3 {
                    let cand = f32::from(px[ch]);
                    let prev = warped[base + ch];
                    let blended = alpha * cand + (1.0 - alpha) * prev;
                    let delta = (blended - prev).clamp(-clamp, clamp);
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        px[ch] = (prev + delta).round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
    }

    fn store_baseline(&mut self, gray: Gray, result: &RgbImage) {
        let crop_of = |rect: Rect| {
            rect.map(|(x, y, w, h)| image::imageops::crop_imm(result, x, y, w, h).to_image())
        };
        self.baseline = Some(Baseline {
            gray,
            blend_crop: crop_of(self.blend_rect),
            overlay_crop: crop_of(self.overlay_rect),
        });
    }
}

impl std::fmt::Debug for TemporalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalSession")
            .field("geometry", &self.geometry)
            .field("frame_count", &self.frame_count)
            .field("tracking", &self.baseline.is_some())
            .finish_non_exhaustive()
    }
}

fn clip_blend(region: &BlendRegion, width: u32, height: u32) -> Rect {
    clip(region.x, region.y, region.width, region.height, width, height)
}

fn clip_overlay(region: &OverlayRegion, width: u32, height: u32) -> Rect {
    clip(region.x, region.y, region.width, region.height, width, height)
}

/// Full-fit clip: a box that does not fit entirely is dropped.
fn clip(x: i64, y: i64, w: u32, h: u32, img_w: u32, img_h: u32) -> Rect {
    if x < 0
        || y < 0
        || w == 0
        || h == 0
        || x + i64::from(w) > i64::from(img_w)
        || y + i64::from(h) > i64::from(img_h)
    {
        None
    } else {
        #[allow(clippy::cast_sign_loss)]
        Some((x as u32, y as u32, w, h))
    }
}
