//! Decode → mode → resize → crop → mask → dtype → normalize → flatten.
//!
//! ## Crate mapping
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` (format sniffed from content) |
//! | Mode conversion | `DynamicImage::to_rgb8` / `to_luma8` |
//! | Resize | `DynamicImage::resize_exact` with `Triangle` filter |
//! | Crop | `DynamicImage::crop_imm` |
//! | Array | `ndarray::ArrayD` via [`Pixels`] |
//!
//! Resizing is a direct resize to the target frame, not a letterbox and not a
//! crop-to-fit. The crop box is expressed in resized-frame coordinates.

use super::ImagingError;
use super::calculations::{apply_mask_value, mean_std, normalization};
use super::params::{ColorMode, PreprocessSpec};
use super::pixels::Pixels;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::{Array1, ArrayD, IxDyn};
use std::path::Path;

/// Resampling filter for the direct resize.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Load and decode an image from disk.
pub fn load_image(path: &Path) -> Result<DynamicImage, ImagingError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| ImagingError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Run the full pipeline on the image stored at `path`.
pub fn process(path: &Path, spec: &PreprocessSpec) -> Result<Pixels, ImagingError> {
    let img = load_image(path)?;
    process_image(img, spec)
}

/// Run the pipeline on an already decoded image.
///
/// Pure: identical input and spec always yield identical output.
pub fn process_image(img: DynamicImage, spec: &PreprocessSpec) -> Result<Pixels, ImagingError> {
    spec.validate()?;

    let converted = convert_mode(img, spec.mode);
    let (width, height) = spec.resize_to;
    let mut frame = converted.resize_exact(width, height, RESIZE_FILTER);

    if let Some(crop) = spec.crop {
        frame = frame.crop_imm(crop.min_x, crop.min_y, crop.width(), crop.height());
    }

    let channels = spec.mode.channels();
    let mut raw = match spec.mode {
        ColorMode::Rgb => frame.into_rgb8().into_raw(),
        ColorMode::L => frame.into_luma8().into_raw(),
    };

    if let Some(mask) = &spec.mask {
        for (i, sample) in raw.iter_mut().enumerate() {
            *sample = apply_mask_value(*sample, mask.as_raw()[i / channels]);
        }
    }

    let mut array = Array1::from(raw)
        .mapv(f64::from)
        .into_shape_with_order(IxDyn(&spec.output_shape()))?;
    if spec.normalize {
        normalize_in_place(&mut array);
    }

    Ok(Pixels::from_array(spec.dtype, array))
}

/// Convert to the 8-bit buffer matching `mode`.
///
/// Images already in that exact layout pass through untouched.
fn convert_mode(img: DynamicImage, mode: ColorMode) -> DynamicImage {
    match (mode, img) {
        (ColorMode::Rgb, img @ DynamicImage::ImageRgb8(_)) => img,
        (ColorMode::L, img @ DynamicImage::ImageLuma8(_)) => img,
        (ColorMode::Rgb, img) => DynamicImage::ImageRgb8(img.to_rgb8()),
        (ColorMode::L, img) => DynamicImage::ImageLuma8(img.to_luma8()),
    }
}

/// Zero mean and unit standard deviation over every sample.
fn normalize_in_place(array: &mut ArrayD<f64>) {
    let (mean, std) = mean_std(array.view());
    let (offset, scale) = normalization(mean, std);
    array.mapv_inplace(|v| (v - offset) * scale);
}
