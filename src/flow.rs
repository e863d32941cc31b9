//! Dense optical flow between consecutive grayscale frames.
//!
//! Coarse-to-fine iterative Lucas-Kanade over a Gaussian pyramid: each level
//! refines the upsampled flow from the level above by solving the windowed
//! 2x2 normal equations per pixel. Sub-pixel accuracy comes from bilinear
//! sampling with reflect-101 border handling. The numeric tuning lives in
//! [`FlowParams`]; the defaults favor stability over sharpness, which is what
//! the temporal stabilizer needs.

use image::RgbImage;

/// A single-channel float plane, row-major, values in `[0, 255]`.
#[derive(Debug, Clone)]
pub struct Gray {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl Gray {
    /// Rec.601 luminance of an RGB frame.
    #[must_use]
    pub fn from_rgb(img: &RgbImage) -> Self {
        let mut data = Vec::with_capacity((img.width() * img.height()) as usize);
        for px in img.pixels() {
            data.push(
                0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]),
            );
        }
        Self {
            data,
            width: img.width(),
            height: img.height(),
        }
    }

    /// Build a plane from raw values.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != width * height`.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), (width * height) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    /// Plane width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Plane height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }
}

/// Optical flow tuning parameters.
#[derive(Debug, Clone)]
pub struct FlowParams {
    /// Downscale factor between pyramid levels (0 < scale < 1).
    pub pyramid_scale: f32,
    /// Maximum number of pyramid levels.
    pub levels: u32,
    /// Side length of the Lucas-Kanade summation window.
    pub window_size: u32,
    /// Refinement iterations per pyramid level.
    pub iterations: u32,
    /// Side length of the final flow-smoothing neighborhood.
    pub neighborhood: u32,
    /// Gaussian pre-smoothing sigma applied per pyramid level.
    pub smoothing_sigma: f32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            pyramid_scale: 0.5,
            levels: 3,
            window_size: 15,
            iterations: 3,
            neighborhood: 5,
            smoothing_sigma: 1.2,
        }
    }
}

/// A dense per-pixel 2D motion field.
#[derive(Debug, Clone)]
pub struct FlowField {
    dx: Vec<f32>,
    dy: Vec<f32>,
    width: u32,
    height: u32,
}

impl FlowField {
    /// An all-zero field.
    #[must_use]
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            dx: vec![0.0; (width * height) as usize],
            dy: vec![0.0; (width * height) as usize],
            width,
            height,
        }
    }

    /// Build a field from raw per-pixel components, row-major.
    ///
    /// # Panics
    ///
    /// Panics if component lengths do not match `width * height`.
    #[must_use]
    pub fn from_components(width: u32, height: u32, dx: Vec<f32>, dy: Vec<f32>) -> Self {
        assert_eq!(dx.len(), (width * height) as usize);
        assert_eq!(dy.len(), (width * height) as usize);
        Self {
            dx,
            dy,
            width,
            height,
        }
    }

    /// Field width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Field height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Motion vector at `(x, y)`.
    #[must_use]
    pub fn vector(&self, x: u32, y: u32) -> (f32, f32) {
        let idx = (y * self.width + x) as usize;
        (self.dx[idx], self.dy[idx])
    }

    /// Mean motion magnitude over the whole field.
    #[must_use]
    pub fn mean_magnitude(&self) -> f32 {
        if self.dx.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .dx
            .iter()
            .zip(&self.dy)
            .map(|(u, v)| (u * u + v * v).sqrt())
            .sum();
        #[allow(clippy::cast_precision_loss)]
        {
            sum / self.dx.len() as f32
        }
    }

    /// Largest single-pixel motion magnitude.
    #[must_use]
    pub fn max_magnitude(&self) -> f32 {
        self.dx
            .iter()
            .zip(&self.dy)
            .map(|(u, v)| (u * u + v * v).sqrt())
            .fold(0.0, f32::max)
    }

    /// Copy out the sub-field covering `[x, x+w) x [y, y+h)`.
    ///
    /// # Panics
    ///
    /// Panics if the window exceeds the field bounds.
    #[must_use]
    pub fn window(&self, x: u32, y: u32, w: u32, h: u32) -> FlowField {
        assert!(x + w <= self.width && y + h <= self.height);
        let mut dx = Vec::with_capacity((w * h) as usize);
        let mut dy = Vec::with_capacity((w * h) as usize);
        for row in y..y + h {
            let start = (row * self.width + x) as usize;
            dx.extend_from_slice(&self.dx[start..start + w as usize]);
            dy.extend_from_slice(&self.dy[start..start + w as usize]);
        }
        FlowField {
            dx,
            dy,
            width: w,
            height: h,
        }
    }
}

/// Scene-cut predicate: frame-wide mean magnitude above `mean_threshold`, or
/// any single pixel above `max_threshold`.
#[must_use]
pub fn is_scene_cut(flow: &FlowField, mean_threshold: f32, max_threshold: f32) -> bool {
    flow.mean_magnitude() > mean_threshold || flow.max_magnitude() > max_threshold
}

/// Reflect-101 fold of a float coordinate into `[0, n-1]`.
fn reflect(mut p: f32, n: u32) -> f32 {
    if n <= 1 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let last = (n - 1) as f32;
    // At most a few folds for the offsets seen here.
    loop {
        if p < 0.0 {
            p = -p;
        } else if p > last {
            p = 2.0 * last - p;
        } else {
            return p;
        }
    }
}

/// Bilinear sample with reflect-101 borders.
fn sample(data: &[f32], width: u32, height: u32, x: f32, y: f32) -> f32 {
    let x = reflect(x, width);
    let y = reflect(y, height);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let x0 = (x.floor() as u32).min(width - 1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y0 = (y.floor() as u32).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    #[allow(clippy::cast_precision_loss)]
    let fx = x - x0 as f32;
    #[allow(clippy::cast_precision_loss)]
    let fy = y - y0 as f32;

    let at = |xx: u32, yy: u32| data[(yy * width + xx) as usize];
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bot = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bot * fy
}

/// Separable Gaussian blur.
fn gaussian_blur(data: &[f32], width: u32, height: u32, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return data.to_vec();
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let radius = (sigma * 2.5).ceil() as i64;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut total = 0.0_f32;
    for i in -radius..=radius {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f32;
        let w = (-x * x / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        total += w;
    }
    for w in &mut kernel {
        *w /= total;
    }

    let (w, h) = (i64::from(width), i64::from(height));
    let mut horiz = vec![0.0_f32; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, kw) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sx = (x + k as i64 - radius).clamp(0, w - 1);
                acc += data[(y * w + sx) as usize] * kw;
            }
            horiz[(y * w + x) as usize] = acc;
        }
    }
    let mut out = vec![0.0_f32; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, kw) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sy = (y + k as i64 - radius).clamp(0, h - 1);
                acc += horiz[(sy * w + x) as usize] * kw;
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    out
}

/// Bilinear resize of a float plane.
fn resize(data: &[f32], width: u32, height: u32, new_w: u32, new_h: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity((new_w * new_h) as usize);
    #[allow(clippy::cast_precision_loss)]
    let sx = width as f32 / new_w as f32;
    #[allow(clippy::cast_precision_loss)]
    let sy = height as f32 / new_h as f32;
    for y in 0..new_h {
        for x in 0..new_w {
            #[allow(clippy::cast_precision_loss)]
            let src_x = (x as f32 + 0.5) * sx - 0.5;
            #[allow(clippy::cast_precision_loss)]
            let src_y = (y as f32 + 0.5) * sy - 0.5;
            out.push(sample(data, width, height, src_x, src_y));
        }
    }
    out
}

/// Sliding box sum over a `(2*radius + 1)` square, borders clamped.
fn box_sum(data: &[f32], width: u32, height: u32, radius: i64) -> Vec<f32> {
    let (w, h) = (i64::from(width), i64::from(height));
    let mut horiz = vec![0.0_f32; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for sx in (x - radius).max(0)..=(x + radius).min(w - 1) {
                acc += data[(y * w + sx) as usize];
            }
            horiz[(y * w + x) as usize] = acc;
        }
    }
    let mut out = vec![0.0_f32; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for sy in (y - radius).max(0)..=(y + radius).min(h - 1) {
                acc += horiz[(sy * w + x) as usize];
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    out
}

struct Level {
    prev: Vec<f32>,
    curr: Vec<f32>,
    width: u32,
    height: u32,
}

/// Smallest dimension allowed at the coarsest pyramid level.
const MIN_LEVEL_DIM: u32 = 12;

fn build_pyramid(prev: &Gray, curr: &Gray, params: &FlowParams) -> Vec<Level> {
    let mut levels = vec![Level {
        prev: gaussian_blur(&prev.data, prev.width, prev.height, params.smoothing_sigma),
        curr: gaussian_blur(&curr.data, curr.width, curr.height, params.smoothing_sigma),
        width: prev.width,
        height: prev.height,
    }];

    let scale = params.pyramid_scale.clamp(0.25, 0.9);
    for _ in 1..params.levels.max(1) {
        let last = levels.last().expect("pyramid has a base level");
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let nw = ((last.width as f32) * scale).round() as u32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let nh = ((last.height as f32) * scale).round() as u32;
        if nw < MIN_LEVEL_DIM || nh < MIN_LEVEL_DIM {
            break;
        }
        let prev_small = resize(&last.prev, last.width, last.height, nw, nh);
        let curr_small = resize(&last.curr, last.width, last.height, nw, nh);
        levels.push(Level {
            prev: gaussian_blur(&prev_small, nw, nh, params.smoothing_sigma),
            curr: gaussian_blur(&curr_small, nw, nh, params.smoothing_sigma),
            width: nw,
            height: nh,
        });
    }
    levels
}

/// Compute dense optical flow from `prev` to `curr`.
///
/// The returned field follows the convention `curr(p + flow(p)) ~ prev(p)`:
/// warping the current frame backwards by the flow reproduces the previous
/// frame, and warping a previous-frame crop forward aligns it with the
/// current frame.
///
/// # Panics
///
/// Panics if the two frames differ in size.
#[must_use]
pub fn dense_flow(prev: &Gray, curr: &Gray, params: &FlowParams) -> FlowField {
    assert_eq!(prev.width, curr.width, "frame size changed mid-sequence");
    assert_eq!(prev.height, curr.height, "frame size changed mid-sequence");

    let pyramid = build_pyramid(prev, curr, params);
    let coarsest = pyramid.last().expect("pyramid has a base level");
    let mut flow = FlowField::zeros(coarsest.width, coarsest.height);

    for level in pyramid.iter().rev() {
        if level.width != flow.width || level.height != flow.height {
            // Upsample the coarser flow and rescale the vectors.
            #[allow(clippy::cast_precision_loss)]
            let gain_x = level.width as f32 / flow.width as f32;
            #[allow(clippy::cast_precision_loss)]
            let gain_y = level.height as f32 / flow.height as f32;
            let dx = resize(&flow.dx, flow.width, flow.height, level.width, level.height);
            let dy = resize(&flow.dy, flow.width, flow.height, level.width, level.height);
            flow = FlowField {
                dx: dx.iter().map(|v| v * gain_x).collect(),
                dy: dy.iter().map(|v| v * gain_y).collect(),
                width: level.width,
                height: level.height,
            };
        }

        for _ in 0..params.iterations.max(1) {
            refine_level(level, &mut flow, params);
        }
    }

    // Mild spatial regularization of the final field.
    if params.neighborhood > 1 {
        let radius = i64::from(params.neighborhood / 2);
        #[allow(clippy::cast_precision_loss)]
        let area = ((2 * radius + 1) * (2 * radius + 1)) as f32;
        let dx = box_sum(&flow.dx, flow.width, flow.height, radius);
        let dy = box_sum(&flow.dy, flow.width, flow.height, radius);
        flow.dx = dx.iter().map(|v| v / area).collect();
        flow.dy = dy.iter().map(|v| v / area).collect();
    }

    flow
}

/// One Gauss-Newton pass of windowed Lucas-Kanade at a pyramid level.
fn refine_level(level: &Level, flow: &mut FlowField, params: &FlowParams) {
    let (w, h) = (level.width, level.height);
    let n = (w * h) as usize;

    // Current frame warped backwards by the present flow estimate.
    let mut warped = Vec::with_capacity(n);
    for y in 0..h {
        for x in 0..w {
            let (fx, fy) = flow.vector(x, y);
            #[allow(clippy::cast_precision_loss)]
            warped.push(sample(&level.curr, w, h, x as f32 + fx, y as f32 + fy));
        }
    }

    // Template gradients and residual.
    let mut ix = vec![0.0_f32; n];
    let mut iy = vec![0.0_f32; n];
    let mut it = vec![0.0_f32; n];
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let xl = x.saturating_sub(1);
            let xr = (x + 1).min(w - 1);
            let yt = y.saturating_sub(1);
            let yb = (y + 1).min(h - 1);
            ix[idx] = (level.prev[(y * w + xr) as usize] - level.prev[(y * w + xl) as usize]) * 0.5;
            iy[idx] = (level.prev[(yb * w + x) as usize] - level.prev[(yt * w + x) as usize]) * 0.5;
            it[idx] = warped[idx] - level.prev[idx];
        }
    }

    let mul = |a: &[f32], b: &[f32]| -> Vec<f32> { a.iter().zip(b).map(|(x, y)| x * y).collect() };
    let radius = i64::from(params.window_size.max(3) / 2);
    let sxx = box_sum(&mul(&ix, &ix), w, h, radius);
    let syy = box_sum(&mul(&iy, &iy), w, h, radius);
    let sxy = box_sum(&mul(&ix, &iy), w, h, radius);
    let sxt = box_sum(&mul(&ix, &it), w, h, radius);
    let syt = box_sum(&mul(&iy, &it), w, h, radius);

    // Ill-conditioned windows (flat texture) contribute no update.
    const DET_EPS: f32 = 1e-4;

    for idx in 0..n {
        let det = sxx[idx] * syy[idx] - sxy[idx] * sxy[idx];
        if det.abs() < DET_EPS {
            continue;
        }
        let du = (-sxt[idx] * syy[idx] + sxy[idx] * syt[idx]) / det;
        let dv = (-syt[idx] * sxx[idx] + sxy[idx] * sxt[idx]) / det;
        flow.dx[idx] += du;
        flow.dy[idx] += dv;
    }
}

/// Warp an RGB crop by a flow field of the same size.
///
/// Each output pixel samples the crop at `p + flow(p)` with bilinear
/// interpolation and reflect-101 borders. Returns `w * h * 3` floats.
///
/// # Panics
///
/// Panics if the flow field's size differs from the crop's.
#[must_use]
pub fn warp_rgb(crop: &RgbImage, flow: &FlowField) -> Vec<f32> {
    assert_eq!(crop.width(), flow.width);
    assert_eq!(crop.height(), flow.height);
    let (w, h) = (crop.width(), crop.height());

    // Per-channel planes for sampling.
    let mut planes = [
        Vec::with_capacity((w * h) as usize),
        Vec::with_capacity((w * h) as usize),
        Vec::with_capacity((w * h) as usize),
    ];
    for px in crop.pixels() {
        planes[0].push(f32::from(px[0]));
        planes[1].push(f32::from(px[1]));
        planes[2].push(f32::from(px[2]));
    }

    let mut out = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h {
        for x in 0..w {
            let (fx, fy) = flow.vector(x, y);
            #[allow(clippy::cast_precision_loss)]
            let (sx, sy) = (x as f32 + fx, y as f32 + fy);
            for plane in &planes {
                out.push(sample(plane, w, h, sx, sy));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smooth_pattern(width: u32, height: u32, shift_x: f32) -> Gray {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                #[allow(clippy::cast_precision_loss)]
                let (xf, yf) = (x as f32 - shift_x, y as f32);
                let v = 120.0 + 60.0 * (xf * 0.12).sin() + 40.0 * (yf * 0.09).cos();
                data.push(v);
            }
        }
        Gray::from_raw(width, height, data)
    }

    #[test]
    fn identical_frames_produce_near_zero_flow() {
        let frame = smooth_pattern(64, 64, 0.0);
        let flow = dense_flow(&frame, &frame, &FlowParams::default());
        assert!(
            flow.mean_magnitude() < 0.05,
            "expected near-zero flow, got mean {}",
            flow.mean_magnitude()
        );
    }

    #[test]
    fn horizontal_shift_is_recovered_approximately() {
        let prev = smooth_pattern(64, 64, 0.0);
        let curr = smooth_pattern(64, 64, 2.0);
        let flow = dense_flow(&prev, &curr, &FlowParams::default());

        // Interior mean dx should be close to the true 2px shift.
        let inner = flow.window(8, 8, 48, 48);
        let mut sum_dx = 0.0;
        let mut sum_dy = 0.0;
        for y in 0..48 {
            for x in 0..48 {
                let (u, v) = inner.vector(x, y);
                sum_dx += u;
                sum_dy += v;
            }
        }
        let mean_dx = sum_dx / (48.0 * 48.0);
        let mean_dy = sum_dy / (48.0 * 48.0);
        assert!(
            (mean_dx - 2.0).abs() < 0.8,
            "expected dx ~2.0, got {mean_dx}"
        );
        assert!(mean_dy.abs() < 0.5, "expected dy ~0, got {mean_dy}");
    }

    #[test]
    fn scene_cut_predicate_triggers_on_magnitude() {
        let calm = FlowField::zeros(32, 32);
        assert!(!is_scene_cut(&calm, 8.0, 50.0));

        let n = 32 * 32;
        let uniform_huge = FlowField::from_components(32, 32, vec![30.0; n], vec![0.0; n]);
        assert!(is_scene_cut(&uniform_huge, 8.0, 50.0));

        // One outlier pixel above the absolute ceiling.
        let mut dx = vec![0.0_f32; n];
        dx[5] = 60.0;
        let outlier = FlowField::from_components(32, 32, dx, vec![0.0; n]);
        assert!(is_scene_cut(&outlier, 8.0, 50.0));
    }

    #[test]
    fn warp_with_zero_flow_is_identity() {
        let mut crop = RgbImage::new(8, 6);
        for y in 0..6 {
            for x in 0..8 {
                #[allow(clippy::cast_possible_truncation)]
                let v = (x * 20 + y * 7) as u8;
                crop.put_pixel(x, y, image::Rgb([v, v.wrapping_add(1), v.wrapping_add(2)]));
            }
        }
        let flow = FlowField::zeros(8, 6);
        let warped = warp_rgb(&crop, &flow);
        for y in 0..6 {
            for x in 0..8 {
                let px = crop.get_pixel(x, y);
                let base = ((y * 8 + x) * 3) as usize;
                for ch in 0..3 {
                    assert!((warped[base + ch] - f32::from(px[ch])).abs() < 1e-3);
                }
            }
        }
    }

    #[test]
    fn warp_with_unit_flow_shifts_samples() {
        // Constant flow (+1, 0): output x samples crop at x+1.
        let mut crop = RgbImage::new(8, 4);
        for y in 0..4 {
            for x in 0..8 {
                #[allow(clippy::cast_possible_truncation)]
                let v = (x * 30) as u8;
                crop.put_pixel(x, y, image::Rgb([v, v, v]));
            }
        }
        let n = 8 * 4;
        let flow = FlowField::from_components(8, 4, vec![1.0; n], vec![0.0; n]);
        let warped = warp_rgb(&crop, &flow);
        // Interior check: warped(2, 1) == crop(3, 1).
        let base = ((8 + 2) * 3) as usize;
        assert!((warped[base] - 90.0).abs() < 1e-3);
    }

    #[test]
    fn reflect_folds_out_of_range_coordinates() {
        assert!((reflect(-1.0, 10) - 1.0).abs() < 1e-6);
        assert!((reflect(9.5, 10) - 8.5).abs() < 1e-6);
        assert!((reflect(4.0, 10) - 4.0).abs() < 1e-6);
        assert!((reflect(3.0, 1) - 0.0).abs() < 1e-6);
    }
}
