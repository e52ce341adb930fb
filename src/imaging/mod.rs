//! Image preprocessing in pure Rust, no system libraries.
//!
//! | Step | Where |
//! |---|---|
//! | **Options** | [`PreprocessSpec`] and friends in `params` |
//! | **Geometry / statistics** | pure helpers in `calculations` |
//! | **Pipeline** | [`process`] / [`process_image`] in `preprocess` |
//! | **Output arrays** | [`Pixels`] in `pixels` |

mod calculations;
mod params;
mod pixels;
mod preprocess;

use std::path::PathBuf;
use thiserror::Error;

pub use calculations::{cropped_dimensions, output_shape};
pub use params::{ColorMode, CropBox, DType, Mask, PreprocessSpec};
pub use pixels::Pixels;
pub use preprocess::{load_image, process, process_image};

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Invalid preprocessing spec: {0}")]
    InvalidSpec(String),
    #[error("Mask is {actual:?} but the cropped frame is {expected:?}")]
    MaskMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}
