//! Error types for the watermark-restore crate.

use std::path::PathBuf;

use crate::position::WatermarkSize;

/// Errors that can occur during watermark restoration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reference opacity map asset could not be located.
    ///
    /// Fatal for any operation that needs the missing size; the asset is
    /// static, so there is nothing to retry.
    #[error("opacity map asset for {size:?} watermark not found at {}", path.display())]
    AssetMissing {
        /// The watermark size whose asset was requested.
        size: WatermarkSize,
        /// The path that was probed.
        path: PathBuf,
    },

    /// A reference opacity map asset was found but could not be decoded.
    #[error("failed to decode opacity map asset {}: {source}", path.display())]
    AssetDecode {
        /// The asset that failed to decode.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// A frame fed to a temporal session does not match the session geometry.
    ///
    /// Terminal for the session: stored crops and flow fields assume constant
    /// frame dimensions.
    #[error("frame size {got_width}x{got_height} does not match session geometry {width}x{height}")]
    FrameSizeMismatch {
        /// Session frame width, fixed by the first frame.
        width: u32,
        /// Session frame height, fixed by the first frame.
        height: u32,
        /// Offending frame width.
        got_width: u32,
        /// Offending frame height.
        got_height: u32,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
