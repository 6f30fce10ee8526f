//! Input containers of a restoration run: the preprocessed data volume, the
//! kernel tensor and the coordinate transform.
//!
//! All three are validated on construction and immutable afterwards, so the
//! restoration loop can rely on their invariants without checking again.

use crate::error::DeconvolutionError;
use ndarray::{Array2, Array3, ArrayView3};

/// Dense, non-negative intensity volume in acquisition space, C order.
#[derive(Clone, Debug, PartialEq)]
pub struct DataVolume {
    data: Array3<f64>,
}

impl DataVolume {
    /// Wraps `data`, rejecting negative and non-finite intensities.
    pub fn new(data: Array3<f64>) -> Result<Self, DeconvolutionError> {
        if let Some(((z, y, x), _)) = data
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(DeconvolutionError::InvalidData { index: [z, y, x] });
        }
        Ok(DataVolume {
            data: standard_layout(data),
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        let (d0, d1, d2) = self.data.dim();
        [d0, d1, d2]
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.data
    }
}

/// Point spread function weights, already cropped by the kernel collaborator.
///
/// The kernel is centered at `shape / 2` (integer division) along every axis.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelTensor {
    weights: Array3<f64>,
}

impl KernelTensor {
    pub fn new(weights: Array3<f64>) -> Result<Self, DeconvolutionError> {
        if weights.is_empty() {
            return Err(DeconvolutionError::InvalidKernel(
                "kernel has no elements".to_string(),
            ));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(DeconvolutionError::InvalidKernel(
                "kernel weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.sum() <= 0.0 {
            return Err(DeconvolutionError::InvalidKernel(
                "kernel has no positive weight".to_string(),
            ));
        }
        Ok(KernelTensor {
            weights: standard_layout(weights),
        })
    }

    /// Single tap of weight one: a kernel that does not blur.
    pub fn delta() -> Self {
        KernelTensor {
            weights: Array3::ones((1, 1, 1)),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (k0, k1, k2) = self.weights.dim();
        [k0, k1, k2]
    }

    pub fn center(&self) -> [usize; 3] {
        self.shape().map(|k| k / 2)
    }

    pub fn weights(&self) -> ArrayView3<'_, f64> {
        self.weights.view()
    }
}

/// Linear map from acquisition-space indices `(z, y, x)` to reconstruction-space
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformMatrix {
    rows: [[f64; 3]; 3],
}

impl TransformMatrix {
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self, DeconvolutionError> {
        if rows.iter().flatten().any(|m| !m.is_finite()) {
            return Err(DeconvolutionError::InvalidTransform(
                "matrix entries must be finite".to_string(),
            ));
        }
        Ok(TransformMatrix { rows })
    }

    /// Reads a 3x3 matrix.
    pub fn from_array(matrix: &Array2<f64>) -> Result<Self, DeconvolutionError> {
        if matrix.dim() != (3, 3) {
            return Err(DeconvolutionError::InvalidTransform(format!(
                "expected a 3x3 matrix, got {:?}",
                matrix.dim()
            )));
        }
        let mut rows = [[0.0; 3]; 3];
        for ((r, c), m) in matrix.indexed_iter() {
            rows[r][c] = *m;
        }
        Self::from_rows(rows)
    }

    pub fn identity() -> Self {
        TransformMatrix {
            rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn rows(&self) -> [[f64; 3]; 3] {
        self.rows
    }

    fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        self.rows
            .map(|row| row[0] * v[0] + row[1] * v[1] + row[2] * v[2])
    }

    /// Shape of the reconstruction volume, `ceil(M · Sd)`.
    pub fn reconstruction_shape(
        &self,
        data_shape: [usize; 3],
    ) -> Result<[usize; 3], DeconvolutionError> {
        let mapped = self.apply(data_shape.map(|d| d as f64));
        let mut shape = [0usize; 3];
        for (axis, extent) in mapped.iter().enumerate() {
            let extent = extent.ceil();
            if !(extent >= 1.0) {
                return Err(DeconvolutionError::InvalidTransform(format!(
                    "data shape {data_shape:?} maps to a non-positive extent {extent} along axis {axis}"
                )));
            }
            shape[axis] = extent as usize;
        }
        Ok(shape)
    }

    /// Reconstruction-space voxel that acquisition voxel `index` is centered on.
    pub fn anchor(&self, index: [usize; 3]) -> [i64; 3] {
        self.apply(index.map(|i| i as f64))
            .map(|c| c.round() as i64)
    }
}

fn standard_layout(array: Array3<f64>) -> Array3<f64> {
    if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    }
}
