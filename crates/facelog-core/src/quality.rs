//! Sharpness scoring for face crops.

use image::GrayImage;

/// Default minimum Laplacian variance for a crop to be considered sharp.
pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;

/// Variance of the 4-neighbour Laplacian over the interior of a grayscale image.
///
/// Kernel:
/// ```text
/// | 0  1  0 |
/// | 1 -4  1 |
/// | 0  1  0 |
/// ```
/// Border pixels are excluded. Images smaller than 3×3 score 0.0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let w = w as usize;
    let h = h as usize;
    let px = gray.as_raw();

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = px[y * w + x] as f64;
            let lap = px[(y - 1) * w + x] as f64
                + px[(y + 1) * w + x] as f64
                + px[y * w + x - 1] as f64
                + px[y * w + x + 1] as f64
                - 4.0 * center;
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = ((w - 2) * (h - 2)) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}
