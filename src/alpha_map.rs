//! Reference opacity maps and their provider.
//!
//! The Gemini watermark is composited from a white logo through a per-pixel
//! opacity map. The reference assets are captures of the watermark rendered on
//! a black background, so the opacity at each pixel is recovered as
//! `max(R, G, B) / 255`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::error::{Error, Result};
use crate::position::WatermarkSize;

/// An immutable 2D grid of opacity values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct AlphaMap {
    values: Vec<f32>,
    width: u32,
    height: u32,
}

impl AlphaMap {
    /// Derive an opacity map from a reference capture.
    ///
    /// The opacity at each pixel is `max(R, G, B) / 255.0`.
    #[must_use]
    pub fn from_image(img: &RgbImage) -> Self {
        let mut values = Vec::with_capacity((img.width() * img.height()) as usize);
        for px in img.pixels() {
            let max_val = px[0].max(px[1]).max(px[2]);
            values.push(f32::from(max_val) / 255.0);
        }
        Self {
            values,
            width: img.width(),
            height: img.height(),
        }
    }

    /// Build a map from raw opacity values, row-major.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != width * height`.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            (width * height) as usize,
            "opacity grid must be width * height"
        );
        Self {
            values,
            width,
            height,
        }
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Opacity at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the grid.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        assert!(x < self.width && y < self.height, "opacity lookup out of grid");
        self.values[(y * self.width + x) as usize]
    }

    /// The raw row-major opacity values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Loads and memoizes the two reference opacity maps.
///
/// Construct one provider and share it; the first `get` per size loads and
/// converts the asset, later calls return the cached map. Population is
/// mutex-guarded so a provider can be shared across threads.
pub struct AlphaMapProvider {
    asset_dir: PathBuf,
    small: Mutex<Option<Arc<AlphaMap>>>,
    large: Mutex<Option<Arc<AlphaMap>>>,
}

impl AlphaMapProvider {
    /// Create a provider reading `bg_48.png` / `bg_96.png` from `asset_dir`.
    ///
    /// Assets are loaded lazily; a missing directory only surfaces on the
    /// first `get` for a size.
    #[must_use]
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            small: Mutex::new(None),
            large: Mutex::new(None),
        }
    }

    /// Create a provider from pre-built maps (embedded assets, tests).
    #[must_use]
    pub fn with_maps(small: AlphaMap, large: AlphaMap) -> Self {
        Self {
            asset_dir: PathBuf::new(),
            small: Mutex::new(Some(Arc::new(small))),
            large: Mutex::new(Some(Arc::new(large))),
        }
    }

    /// Get the opacity map for a watermark size, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetMissing`] if the reference asset does not exist
    /// and [`Error::AssetDecode`] if it cannot be decoded.
    ///
    /// # Panics
    ///
    /// Panics if the cache mutex is poisoned.
    pub fn get(&self, size: WatermarkSize) -> Result<Arc<AlphaMap>> {
        let slot = match size {
            WatermarkSize::Small => &self.small,
            WatermarkSize::Large => &self.large,
        };

        let mut guard = slot.lock().expect("alpha map cache poisoned");
        if let Some(map) = guard.as_ref() {
            return Ok(Arc::clone(map));
        }

        let map = Arc::new(self.load(size)?);
        *guard = Some(Arc::clone(&map));
        Ok(map)
    }

    fn load(&self, size: WatermarkSize) -> Result<AlphaMap> {
        let path = self.asset_path(size);
        if !path.exists() {
            return Err(Error::AssetMissing { size, path });
        }
        let img = image::open(&path)
            .map_err(|source| Error::AssetDecode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(AlphaMap::from_image(&img))
    }

    /// Path of the reference asset for a size.
    #[must_use]
    pub fn asset_path(&self, size: WatermarkSize) -> PathBuf {
        let name = match size {
            WatermarkSize::Small => "bg_48.png",
            WatermarkSize::Large => "bg_96.png",
        };
        self.asset_dir.join(name)
    }

    /// The configured asset directory.
    #[must_use]
    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }
}

impl std::fmt::Debug for AlphaMapProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaMapProvider")
            .field("asset_dir", &self.asset_dir)
            .finish_non_exhaustive()
    }
}
