//! Pure calculation functions for frame geometry and array statistics.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{ColorMode, CropBox};
use ndarray::{ArrayView, Dimension};

/// Frame dimensions `(width, height)` after an optional crop of a resized frame.
///
/// # Examples
/// ```
/// # use imagenet_cache::imaging::{CropBox, cropped_dimensions};
/// assert_eq!(cropped_dimensions((32, 32), None), (32, 32));
/// assert_eq!(cropped_dimensions((32, 32), Some(CropBox::new(0, 16, 4, 12))), (16, 8));
/// ```
pub fn cropped_dimensions(resized: (u32, u32), crop: Option<CropBox>) -> (u32, u32) {
    match crop {
        Some(c) => (c.width(), c.height()),
        None => resized,
    }
}

/// True when the crop box is non-empty and lies inside the resized frame.
pub fn crop_fits(crop: CropBox, resized: (u32, u32)) -> bool {
    let (w, h) = resized;
    crop.min_x < crop.max_x && crop.min_y < crop.max_y && crop.max_x <= w && crop.max_y <= h
}

/// Shape of one processed array, row-major.
///
/// - RGB: `[height, width, 3]`
/// - L: `[height, width]`
/// - flattened: `[height * width * channels]`
pub fn output_shape(frame: (u32, u32), mode: ColorMode, flatten: bool) -> Vec<usize> {
    let (w, h) = (frame.0 as usize, frame.1 as usize);
    let channels = mode.channels();
    if flatten {
        return vec![w * h * channels];
    }
    match mode {
        ColorMode::Rgb => vec![h, w, channels],
        ColorMode::L => vec![h, w],
    }
}

/// Scale an 8-bit sample by an 8-bit mask value, rounding to nearest.
///
/// `255` keeps the sample, `0` clears it.
pub fn apply_mask_value(sample: u8, mask: u8) -> u8 {
    ((sample as u32 * mask as u32 + 127) / 255) as u8
}

/// Population mean and standard deviation of the array.
///
/// Returns `(0.0, 0.0)` for an empty array.
pub fn mean_std<D: Dimension>(values: ArrayView<'_, f64, D>) -> (f64, f64) {
    match values.mean() {
        Some(mean) => (mean, values.std(0.0)),
        None => (0.0, 0.0),
    }
}

/// Coefficients `(offset, scale)` so that `(x - offset) * scale` has zero mean
/// and unit standard deviation. A constant input gets `scale = 1.0` so it
/// becomes all zeros instead of NaN.
pub fn normalization(mean: f64, std: f64) -> (f64, f64) {
    if std > 0.0 && std.is_finite() {
        (mean, 1.0 / std)
    } else {
        (mean, 1.0)
    }
}
