//! Reconstruct original pixels beneath Gemini and Veo watermarks.
//!
//! Gemini overlays a semi-transparent star/sparkle logo on generated images
//! via a known linear alpha composite, which this crate inverts using
//! calibrated 48x48 and 96x96 opacity maps. Veo stamps a text overlay with no
//! known blend formula, which is synthesized instead: sampled from the strip
//! above it or inpainted, depending on the local background. For video, a
//! per-session temporal engine stabilizes both corrections across frames with
//! dense optical flow so the fix does not flicker.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_restore::{ProcessOptions, WatermarkEngine};
//!
//! let engine = WatermarkEngine::new("assets");
//! let mut img = image::open("photo.jpg").unwrap().to_rgb8();
//! engine.clean_frame(&mut img, &ProcessOptions::default()).expect("restoration failed");
//! img.save("cleaned.jpg").unwrap();
//! ```
//!
//! # Video
//!
//! The caller owns demuxing, decoding, and encoding. Per frame, run the
//! stateless pipeline to get a candidate, then feed original and candidate to
//! one long-lived session per video:
//!
//! ```no_run
//! use watermark_restore::{ProcessOptions, WatermarkEngine};
//!
//! let engine = WatermarkEngine::new("assets");
//! let mut session = engine.create_session();
//! let opts = ProcessOptions { veo: true, ..ProcessOptions::default() };
//! # let frames: Vec<image::RgbImage> = vec![];
//! for original in frames {
//!     let mut candidate = original.clone();
//!     engine.clean_frame(&mut candidate, &opts).unwrap();
//!     let stabilized = session.process_frame(&original, candidate).unwrap();
//!     // hand `stabilized` to the encoder
//! }
//! ```

#![deny(missing_docs)]

pub mod alpha_map;
pub mod blend;
mod engine;
pub mod error;
pub mod flow;
pub mod position;
pub mod presence;
pub mod temporal;
pub mod veo;

pub use alpha_map::{AlphaMap, AlphaMapProvider};
pub use engine::{
    default_output_path, is_supported_image, save_image, FrameReport, ProcessOptions,
    ProcessResult, WatermarkEngine,
};
pub use error::{Error, Result};
pub use position::WatermarkSize;
pub use temporal::{TemporalParams, TemporalSession};
