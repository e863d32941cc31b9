use std::sync::Arc;

use image::RgbImage;
use watermark_restore::{
    AlphaMap, AlphaMapProvider, Error, ProcessOptions, WatermarkEngine, WatermarkSize,
};

/// Synthetic opacity map in the shape of a real logo cutout: transparent
/// border, faint ring, near-opaque core.
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

fn test_engine() -> WatermarkEngine {
    let provider = AlphaMapProvider::with_maps(tiered_map(48), tiered_map(96));
    WatermarkEngine::with_provider(Arc::new(provider))
}

/// Composite a white logo over the image with the map's per-pixel opacity.
fn apply_forward(image: &mut RgbImage, alpha: &AlphaMap, x0: u32, y0: u32) {
    for dy in 0..alpha.height() {
        for dx in 0..alpha.width() {
            let a = alpha.get(dx, dy);
            let px = image.get_pixel_mut(x0 + dx, y0 + dy);
            for ch in 0..3 {
                let orig = f32::from(px[ch]);
                let blended = orig.mul_add(1.0 - a, 255.0 * a);
                px[ch] = blended.clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[test]
fn restores_blended_corner_of_large_frame() {
    // 1200x800 picks the 96px map; its box sits 64px off the bottom-right
    // corner, at (1040, 640).
    let engine = test_engine();
    let mut img = RgbImage::from_pixel(1200, 800, image::Rgb([30, 20, 40]));
    let pristine = img.clone();

    apply_forward(&mut img, &tiered_map(96), 1040, 640);
    let report = engine
        .clean_frame(&mut img, &ProcessOptions::default())
        .unwrap();
    assert!(report.blend_applied);
    assert!(!report.overlay_applied);

    for y in 0..800 {
        for x in 0..1200 {
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
fn clean_frame_leaves_unwatermarked_image_untouched() {
    let engine = test_engine();
    let mut img = RgbImage::from_pixel(640, 480, image::Rgb([90, 90, 90]));
    let pristine = img.clone();

    let report = engine
        .clean_frame(&mut img, &ProcessOptions::default())
        .unwrap();
    assert!(!report.blend_applied);
    assert_eq!(img, pristine);
}

#[test]
fn overlay_pass_is_identity_on_uniform_frame() {
    // Copying the strip above onto an identical strip must reproduce the
    // exact bytes, feathering included.
    let engine = test_engine();
    let mut img = RgbImage::from_pixel(640, 480, image::Rgb([77, 77, 77]));
    let pristine = img.clone();

    let opts = ProcessOptions {
        veo: true,
        ..ProcessOptions::default()
    };
    engine.clean_frame(&mut img, &opts).unwrap();
    assert_eq!(img, pristine);
}

#[test]
fn force_mode_reverses_without_detection() {
    let engine = test_engine();
    let mut img = RgbImage::from_pixel(640, 480, image::Rgb([90, 90, 90]));

    let opts = ProcessOptions {
        force: true,
        ..ProcessOptions::default()
    };
    let report = engine.clean_frame(&mut img, &opts).unwrap();
    assert!(report.blend_applied);

    // 640x480 picks the 48px map at (560, 400); the near-opaque core inverts
    // a mid-gray far below its starting value.
    let core = img.get_pixel(560 + 24, 400 + 24);
    assert!(core[0] < 90, "core pixel should move under a forced inverse");
}

#[test]
fn force_size_overrides_dimension_rule() {
    // 800x600 would pick the 48px map; forcing Large places the 96px box at
    // (640, 440) instead, and the round trip must still hold there.
    let engine = test_engine();
    let mut img = RgbImage::from_pixel(800, 600, image::Rgb([30, 20, 40]));
    let pristine = img.clone();

    apply_forward(&mut img, &tiered_map(96), 640, 440);
    let opts = ProcessOptions {
        force_size: Some(WatermarkSize::Large),
        ..ProcessOptions::default()
    };
    let report = engine.clean_frame(&mut img, &opts).unwrap();
    assert!(report.blend_applied);

    for y in 0..600 {
        for x in 0..800 {
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
fn session_returns_first_frame_candidate_unchanged() {
    let engine = test_engine();
    let mut session = engine.create_session();

    let original = RgbImage::from_pixel(160, 160, image::Rgb([100, 100, 100]));
    let mut candidate = original.clone();
    apply_forward(&mut candidate, &tiered_map(48), 48, 48);

    let out = session.process_frame(&original, candidate.clone()).unwrap();
    assert_eq!(out, candidate);
    assert_eq!(session.frame_count(), 1);
}

#[test]
fn session_rejects_frame_size_change() {
    let engine = test_engine();
    let mut session = engine.create_session();

    let first = RgbImage::new(160, 160);
    session.process_frame(&first, first.clone()).unwrap();

    let wrong = RgbImage::new(200, 160);
    let err = session.process_frame(&wrong, wrong.clone()).unwrap_err();
    assert!(matches!(err, Error::FrameSizeMismatch { .. }));
}

#[test]
fn missing_assets_surface_as_typed_error() {
    let engine = WatermarkEngine::new("/nonexistent/assets");
    let mut img = RgbImage::new(200, 200);
    let err = engine
        .clean_frame(&mut img, &ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AssetMissing { .. }));
}
