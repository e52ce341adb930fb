//! Numeric arrays produced by the pipeline.
//!
//! [`Pixels`] is a dtype-tagged `ndarray::ArrayD`. A single processed image
//! and a stacked batch share the type; a batch simply has one extra leading
//! axis.

use super::ImagingError;
use super::params::DType;
use ndarray::{ArrayD, Axis, IxDyn};

#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    U8(ArrayD<u8>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl Pixels {
    /// Build from row-major `f64` samples, converting to `dtype`.
    pub(crate) fn from_samples(
        dtype: DType,
        shape: &[usize],
        samples: Vec<f64>,
    ) -> Result<Self, ImagingError> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), samples)?;
        Ok(Self::from_array(dtype, array))
    }

    /// Convert an `f64` array to `dtype`.
    ///
    /// Values are expected to already be in range for `uint8` when that
    /// dtype is requested; they are rounded and clamped.
    pub(crate) fn from_array(dtype: DType, array: ArrayD<f64>) -> Self {
        match dtype {
            DType::Uint8 => Pixels::U8(array.mapv(|v| v.round().clamp(0.0, 255.0) as u8)),
            DType::Float32 => Pixels::F32(array.mapv(|v| v as f32)),
            DType::Float64 => Pixels::F64(array),
        }
    }

    /// An empty batch: zero items of the given per-item shape.
    pub fn empty_batch(dtype: DType, item_shape: &[usize]) -> Self {
        let mut shape = Vec::with_capacity(item_shape.len() + 1);
        shape.push(0);
        shape.extend_from_slice(item_shape);
        let shape = IxDyn(&shape);
        match dtype {
            DType::Uint8 => Pixels::U8(ArrayD::zeros(shape)),
            DType::Float32 => Pixels::F32(ArrayD::zeros(shape)),
            DType::Float64 => Pixels::F64(ArrayD::zeros(shape)),
        }
    }

    /// Stack items of identical dtype and shape along a new leading axis.
    pub fn stack(items: &[Pixels]) -> Result<Self, ImagingError> {
        let Some(first) = items.first() else {
            return Err(ImagingError::ProcessingFailed(
                "cannot stack an empty list of arrays".into(),
            ));
        };
        macro_rules! stack_variant {
            ($variant:ident) => {{
                let views = items
                    .iter()
                    .map(|p| match p {
                        Pixels::$variant(a) => Ok(a.view()),
                        other => Err(ImagingError::ProcessingFailed(format!(
                            "cannot stack {} with {}",
                            first.dtype(),
                            other.dtype()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Pixels::$variant(ndarray::stack(Axis(0), &views)?)
            }};
        }
        Ok(match first {
            Pixels::U8(_) => stack_variant!(U8),
            Pixels::F32(_) => stack_variant!(F32),
            Pixels::F64(_) => stack_variant!(F64),
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            Pixels::U8(_) => DType::Uint8,
            Pixels::F32(_) => DType::Float32,
            Pixels::F64(_) => DType::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Pixels::U8(a) => a.shape(),
            Pixels::F32(a) => a.shape(),
            Pixels::F64(a) => a.shape(),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
        match self {
            Pixels::U8(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Pixels::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Pixels::F64(a) => Some(a),
            _ => None,
        }
    }

    /// All elements widened to `f64`, row-major.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Pixels::U8(a) => a.iter().map(|&v| v as f64).collect(),
            Pixels::F32(a) => a.iter().map(|&v| v as f64).collect(),
            Pixels::F64(a) => a.iter().copied().collect(),
        }
    }

    /// Population mean and standard deviation over every element.
    pub fn mean_std(&self) -> (f64, f64) {
        let widened = match self {
            Pixels::U8(a) => a.mapv(f64::from),
            Pixels::F32(a) => a.mapv(f64::from),
            Pixels::F64(a) => return super::calculations::mean_std(a.view()),
        };
        super::calculations::mean_std(widened.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_samples_converts_dtype() {
        let p = Pixels::from_samples(DType::Uint8, &[2], vec![1.4, 300.0]).unwrap();
        assert_eq!(p.as_u8().unwrap().as_slice().unwrap(), &[1, 255]);

        let p = Pixels::from_samples(DType::Float32, &[1, 2], vec![0.5, 1.5]).unwrap();
        assert_eq!(p.shape(), &[1, 2]);
        assert_eq!(p.dtype(), DType::Float32);
    }

    #[test]
    fn from_samples_rejects_bad_shape() {
        assert!(Pixels::from_samples(DType::Float64, &[3], vec![1.0]).is_err());
    }

    #[test]
    fn stack_adds_leading_axis() {
        let a = Pixels::from_samples(DType::Float32, &[2, 2], vec![0.0; 4]).unwrap();
        let b = Pixels::from_samples(DType::Float32, &[2, 2], vec![1.0; 4]).unwrap();
        let batch = Pixels::stack(&[a, b]).unwrap();
        assert_eq!(batch.shape(), &[2, 2, 2]);
        let values = batch.to_f64_vec();
        assert_eq!(&values[..4], &[0.0; 4]);
        assert_eq!(&values[4..], &[1.0; 4]);
    }

    #[test]
    fn stack_rejects_mixed_dtypes() {
        let a = Pixels::from_samples(DType::Float32, &[1], vec![0.0]).unwrap();
        let b = Pixels::from_samples(DType::Float64, &[1], vec![0.0]).unwrap();
        assert!(Pixels::stack(&[a, b]).is_err());
    }

    #[test]
    fn stack_rejects_empty() {
        assert!(Pixels::stack(&[]).is_err());
    }

    #[test]
    fn empty_batch_shape() {
        let p = Pixels::empty_batch(DType::Float64, &[4, 4, 3]);
        assert_eq!(p.shape(), &[0, 4, 4, 3]);
        assert!(p.is_empty());
    }
}
