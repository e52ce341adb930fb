//! Preprocessing option types.
//!
//! These structs describe *what* to do to every image of a request, not *how*
//! to do it. The pipeline in [`preprocess`](super::preprocess) reads them;
//! nothing in this module touches pixels.
//!
//! ## Types
//!
//! - [`PreprocessSpec`]: the full option set `{resize_to, mode, dtype, crop, mask, normalize, flatten}`.
//! - [`ColorMode`]: `RGB` (3 channels) or `L` (single luminance channel).
//! - [`DType`]: numeric element type of the produced array.
//! - [`CropBox`]: `(min_x, max_x, min_y, max_y)` in resized-frame coordinates.
//! - [`Mask`]: 8-bit selection mask, shared cheaply between clones of a spec.

use super::ImagingError;
use super::calculations::{crop_fits, cropped_dimensions};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Target color mode of the decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "L")]
    L,
}

impl ColorMode {
    /// Number of channels per pixel.
    pub fn channels(self) -> usize {
        match self {
            ColorMode::Rgb => 3,
            ColorMode::L => 1,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorMode::Rgb => write!(f, "RGB"),
            ColorMode::L => write!(f, "L"),
        }
    }
}

impl std::str::FromStr for ColorMode {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RGB" | "rgb" => Ok(ColorMode::Rgb),
            "L" | "l" => Ok(ColorMode::L),
            other => Err(ImagingError::InvalidSpec(format!(
                "unknown color mode '{other}' (expected RGB or L)"
            ))),
        }
    }
}

/// Numeric element type of a processed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    #[default]
    Float32,
    Float64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Uint8 => "uint8",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DType {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint8" | "u8" => Ok(DType::Uint8),
            "float32" | "f32" => Ok(DType::Float32),
            "float64" | "f64" => Ok(DType::Float64),
            other => Err(ImagingError::InvalidSpec(format!(
                "unknown dtype '{other}' (expected uint8, float32 or float64)"
            ))),
        }
    }
}

/// Crop box applied after resize: `[min_x, max_x, min_y, max_y]`, max exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct CropBox {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl CropBox {
    pub fn new(min_x: u32, max_x: u32, min_y: u32, max_y: u32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.saturating_sub(self.min_y)
    }
}

impl From<[u32; 4]> for CropBox {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<CropBox> for [u32; 4] {
    fn from(c: CropBox) -> Self {
        [c.min_x, c.max_x, c.min_y, c.max_y]
    }
}

/// Selection mask: each output pixel is scaled by `mask / 255`.
#[derive(Clone, PartialEq)]
pub struct Mask(Arc<GrayImage>);

impl Mask {
    pub fn from_image(image: GrayImage) -> Self {
        Self(Arc::new(image))
    }

    /// Load a mask from any decodable image; converted to 8-bit luminance.
    pub fn open(path: &Path) -> Result<Self, ImagingError> {
        let img = super::preprocess::load_image(path)?;
        Ok(Self::from_image(img.into_luma8()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_raw(&self) -> &[u8] {
        self.0.as_raw()
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "Mask({w}x{h})")
    }
}

/// Options applied uniformly to every image of a request.
///
/// Defaults: 256x256, RGB, float32, no crop, no mask, normalized, not flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessSpec {
    /// Direct resize target `(width, height)`; aspect ratio is not preserved.
    pub resize_to: (u32, u32),
    pub mode: ColorMode,
    pub dtype: DType,
    pub crop: Option<CropBox>,
    pub mask: Option<Mask>,
    /// Zero mean, unit standard deviation over the whole array.
    pub normalize: bool,
    pub flatten: bool,
}

impl Default for PreprocessSpec {
    fn default() -> Self {
        Self {
            resize_to: (256, 256),
            mode: ColorMode::Rgb,
            dtype: DType::Float32,
            crop: None,
            mask: None,
            normalize: true,
            flatten: false,
        }
    }
}

impl PreprocessSpec {
    /// Resize to `(width, height)` and nothing else: RGB, float32, no normalization.
    pub fn resize_only(width: u32, height: u32) -> Self {
        Self {
            resize_to: (width, height),
            normalize: false,
            ..Default::default()
        }
    }

    pub fn with_crop(mut self, crop: CropBox) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    /// Dimensions `(width, height)` of the frame after resize and crop.
    pub fn frame_dimensions(&self) -> (u32, u32) {
        cropped_dimensions(self.resize_to, self.crop)
    }

    /// Shape of one processed array.
    pub fn output_shape(&self) -> Vec<usize> {
        super::calculations::output_shape(self.frame_dimensions(), self.mode, self.flatten)
    }

    /// Check that the options are mutually consistent.
    pub fn validate(&self) -> Result<(), ImagingError> {
        let (w, h) = self.resize_to;
        if w == 0 || h == 0 {
            return Err(ImagingError::InvalidSpec(format!(
                "resize_to must be non-zero, got {w}x{h}"
            )));
        }
        if let Some(crop) = self.crop
            && !crop_fits(crop, self.resize_to)
        {
            return Err(ImagingError::InvalidSpec(format!(
                "crop {:?} does not fit inside the {w}x{h} resized frame",
                <[u32; 4]>::from(crop)
            )));
        }
        if let Some(mask) = &self.mask {
            let frame = self.frame_dimensions();
            if mask.dimensions() != frame {
                return Err(ImagingError::MaskMismatch {
                    expected: frame,
                    actual: mask.dimensions(),
                });
            }
        }
        if self.normalize && !self.dtype.is_float() {
            return Err(ImagingError::InvalidSpec(format!(
                "normalize requires a float dtype, got {}",
                self.dtype
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_values() {
        let spec = PreprocessSpec::default();
        assert_eq!(spec.resize_to, (256, 256));
        assert_eq!(spec.mode, ColorMode::Rgb);
        assert_eq!(spec.dtype, DType::Float32);
        assert!(spec.crop.is_none());
        assert!(spec.mask.is_none());
        assert!(spec.normalize);
        assert!(!spec.flatten);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn output_shape_rgb_and_gray() {
        assert_eq!(
            PreprocessSpec::resize_only(32, 24).output_shape(),
            vec![24, 32, 3]
        );
        let gray = PreprocessSpec {
            mode: ColorMode::L,
            ..PreprocessSpec::resize_only(32, 24)
        };
        assert_eq!(gray.output_shape(), vec![24, 32]);
        assert_eq!(gray.flattened().output_shape(), vec![32 * 24]);
    }

    #[test]
    fn crop_changes_frame() {
        let spec = PreprocessSpec::resize_only(32, 32).with_crop(CropBox::new(0, 16, 0, 16));
        assert_eq!(spec.frame_dimensions(), (16, 16));
        assert_eq!(spec.output_shape(), vec![16, 16, 3]);
    }

    #[test]
    fn crop_outside_frame_is_invalid() {
        let spec = PreprocessSpec::resize_only(32, 32).with_crop(CropBox::new(0, 40, 0, 16));
        assert!(matches!(spec.validate(), Err(ImagingError::InvalidSpec(_))));
    }

    #[test]
    fn empty_crop_is_invalid() {
        let spec = PreprocessSpec::resize_only(32, 32).with_crop(CropBox::new(8, 8, 0, 16));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_resize_is_invalid() {
        assert!(PreprocessSpec::resize_only(0, 10).validate().is_err());
    }

    #[test]
    fn normalize_requires_float() {
        let spec = PreprocessSpec {
            dtype: DType::Uint8,
            normalize: true,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn mask_must_match_frame() {
        let spec = PreprocessSpec::resize_only(8, 8).with_mask(Mask::from_image(GrayImage::new(4, 4)));
        assert!(matches!(
            spec.validate(),
            Err(ImagingError::MaskMismatch {
                expected: (8, 8),
                actual: (4, 4)
            })
        ));
    }

    #[test]
    fn mode_and_dtype_parse() {
        assert_eq!("RGB".parse::<ColorMode>().unwrap(), ColorMode::Rgb);
        assert_eq!("L".parse::<ColorMode>().unwrap(), ColorMode::L);
        assert!("CMYK".parse::<ColorMode>().is_err());
        assert_eq!("float64".parse::<DType>().unwrap(), DType::Float64);
        assert_eq!("uint8".parse::<DType>().unwrap(), DType::Uint8);
        assert!("int16".parse::<DType>().is_err());
    }

    #[test]
    fn crop_box_serde_as_array() {
        let crop: CropBox = serde_json::from_str("[0, 16, 2, 18]").unwrap();
        assert_eq!(crop, CropBox::new(0, 16, 2, 18));
        assert_eq!(serde_json::to_string(&crop).unwrap(), "[0,16,2,18]");
        assert_eq!(crop.width(), 16);
        assert_eq!(crop.height(), 16);
    }
}
