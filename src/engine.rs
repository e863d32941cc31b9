//! Core watermark restoration engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::alpha_map::AlphaMapProvider;
use crate::blend;
use crate::error::{Error, Result};
use crate::flow::FlowParams;
use crate::position::{self, WatermarkSize};
use crate::presence::PresenceParams;
use crate::temporal::{TemporalParams, TemporalSession};
use crate::veo::{self, VeoParams};

/// Options controlling file processing behavior.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Skip the presence test and reverse the blend unconditionally.
    pub force: bool,
    /// Force a specific watermark size instead of deriving it from dimensions.
    pub force_size: Option<WatermarkSize>,
    /// Also reconstruct the Veo overlay region (video-style watermark).
    pub veo: bool,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (nothing to restore).
    pub skipped: bool,
    /// Whether the blend-type watermark was reversed.
    pub blend_applied: bool,
    /// Whether the overlay-type watermark was reconstructed.
    pub overlay_applied: bool,
    /// Human-readable status message.
    pub message: String,
}

/// Outcome of restoring one in-memory frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameReport {
    /// The blend-type watermark was detected and reversed.
    pub blend_applied: bool,
    /// The overlay-type watermark was reconstructed.
    pub overlay_applied: bool,
}

/// The restoration engine holding the opacity-map provider and all tuning
/// parameters.
///
/// Create once and reuse: the provider memoizes the reference maps, and the
/// engine itself is immutable, so it can be shared across threads for
/// independent images or videos.
pub struct WatermarkEngine {
    provider: Arc<AlphaMapProvider>,
    presence: PresenceParams,
    veo: VeoParams,
    temporal: TemporalParams,
    flow: FlowParams,
}

impl WatermarkEngine {
    /// Create an engine loading reference assets from `asset_dir`.
    ///
    /// Assets are loaded lazily: a bad directory surfaces as
    /// [`Error::AssetMissing`] on the first frame that needs a map.
    #[must_use]
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self::with_provider(Arc::new(AlphaMapProvider::new(asset_dir)))
    }

    /// Create an engine around an existing provider (shared caches, embedded
    /// or pre-built maps).
    #[must_use]
    pub fn with_provider(provider: Arc<AlphaMapProvider>) -> Self {
        Self {
            provider,
            presence: PresenceParams::default(),
            veo: VeoParams::default(),
            temporal: TemporalParams::default(),
            flow: FlowParams::default(),
        }
    }

    /// Replace the presence-test thresholds.
    #[must_use]
    pub fn presence_params(mut self, params: PresenceParams) -> Self {
        self.presence = params;
        self
    }

    /// Replace the overlay reconstruction parameters.
    #[must_use]
    pub fn veo_params(mut self, params: VeoParams) -> Self {
        self.veo = params;
        self
    }

    /// Replace the temporal smoothing parameters.
    #[must_use]
    pub fn temporal_params(mut self, params: TemporalParams) -> Self {
        self.temporal = params;
        self
    }

    /// Replace the optical flow parameters.
    #[must_use]
    pub fn flow_params(mut self, params: FlowParams) -> Self {
        self.flow = params;
        self
    }

    /// The engine's opacity-map provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<AlphaMapProvider> {
        &self.provider
    }

    /// Run the full non-temporal pipeline on one frame, in place.
    ///
    /// Reverses the blend-type watermark (guarded by the presence test unless
    /// `force`), then reconstructs the overlay region when `veo` is set.
    /// Regions that do not fit the frame are silently skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the required opacity map cannot be loaded.
    pub fn clean_frame(&self, frame: &mut RgbImage, opts: &ProcessOptions) -> Result<FrameReport> {
        let (w, h) = (frame.width(), frame.height());
        let mut region = position::blend_region(w, h);
        if let Some(size) = opts.force_size {
            let side = i64::from(size.pixels());
            let margin = i64::from(size.margin());
            region = position::BlendRegion {
                x: i64::from(w) - margin - side,
                y: i64::from(h) - margin - side,
                width: size.pixels(),
                height: size.pixels(),
                size,
            };
        }
        let alpha = self.provider.get(region.size)?;

        let presence = (!opts.force).then_some(&self.presence);
        let blend_applied = blend::reverse_blend(frame, &alpha, &region, presence);

        let overlay_applied = if opts.veo {
            let overlay = position::overlay_region(w, h);
            veo::remove_overlay(frame, &overlay, &self.veo)
        } else {
            false
        };

        Ok(FrameReport {
            blend_applied,
            overlay_applied,
        })
    }

    /// Create a temporal session for one video, using the engine's parameters.
    ///
    /// The caller decodes frames in order, produces a candidate per frame via
    /// [`Self::clean_frame`], and feeds both to the session; the stabilized
    /// frame goes to the encoder.
    #[must_use]
    pub fn create_session(&self) -> TemporalSession {
        TemporalSession::new(self.temporal.clone(), self.flow.clone())
    }

    /// Process a single image file: load, restore, save.
    ///
    /// Returns a [`ProcessResult`] indicating success, skip, or failure.
    #[must_use]
    pub fn process_file(&self, input: &Path, output: &Path, opts: &ProcessOptions) -> ProcessResult {
        let mut result = ProcessResult {
            path: input.to_path_buf(),
            success: false,
            skipped: false,
            blend_applied: false,
            overlay_applied: false,
            message: String::new(),
        };

        let dyn_img = match image::open(input) {
            Ok(img) => img,
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let mut rgb_img = dyn_img.to_rgb8();

        let report = match self.clean_frame(&mut rgb_img, opts) {
            Ok(report) => report,
            Err(e) => {
                result.message = format!("Restoration failed: {e}");
                return result;
            }
        };
        result.blend_applied = report.blend_applied;
        result.overlay_applied = report.overlay_applied;

        if !report.blend_applied && !report.overlay_applied {
            result.skipped = true;
            result.success = true;
            result.message = "No watermark found to restore".to_string();
            return result;
        }

        if let Some(parent) = output.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&rgb_img, output) {
            Ok(()) => {
                result.success = true;
                result.message = match (report.blend_applied, report.overlay_applied) {
                    (true, true) => "Gemini and Veo watermarks restored".to_string(),
                    (true, false) => "Gemini watermark restored".to_string(),
                    _ => "Veo watermark restored".to_string(),
                };
            }
            Err(e) => {
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    ///
    /// # Panics
    ///
    /// Panics if any directory entry has no filename (should not happen for
    /// regular files).
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let entries: Vec<_> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .filter(|e| is_supported_image(e.path().as_path()))
                .collect(),
            Err(e) => {
                return vec![ProcessResult {
                    path: input_dir.to_path_buf(),
                    success: false,
                    skipped: false,
                    blend_applied: false,
                    overlay_applied: false,
                    message: format!("Failed to read directory: {e}"),
                }];
            }
        };

        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                return vec![ProcessResult {
                    path: output_dir.to_path_buf(),
                    success: false,
                    skipped: false,
                    blend_applied: false,
                    overlay_applied: false,
                    message: format!("Failed to create output directory: {e}"),
                }];
            }
        }

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries
                .par_iter()
                .map(|entry| {
                    let input_path = entry.path();
                    let filename = input_path.file_name().unwrap();
                    let output_path = output_dir.join(filename);
                    self.process_file(&input_path, &output_path, opts)
                })
                .collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries
                .iter()
                .map(|entry| {
                    let input_path = entry.path();
                    let filename = input_path.file_name().unwrap();
                    let output_path = output_dir.join(filename);
                    self.process_file(&input_path, &output_path, opts)
                })
                .collect()
        }
    }
}

impl std::fmt::Debug for WatermarkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkEngine")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff"
        ),
        None => false,
    }
}

/// Save an RGB image with format-specific quality settings.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    let dyn_img = DynamicImage::ImageRgb8(img.clone());

    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(&dyn_img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp | ImageFormat::Tiff => {
            dyn_img.save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.{ext}"))
}
