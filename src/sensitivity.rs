//! Sensitivity normalization of the multiplicative update.

use crate::error::DeconvolutionError;
use crate::math_tools::{clip_floor, max_value};
use crate::operators::{AdjointProjectionOperator, SamplingGeometry, VoxelExecutor};
use ndarray::{Array3, ArrayView3};

/// Fraction of the peak sensitivity below which voxels are raised to the floor.
pub const SENSITIVITY_FLOOR_RATIO: f64 = 0.3;

/// Cumulative sampling weight per reconstruction voxel, floor-clipped so the
/// update never divides by a near-zero weight.
#[derive(Debug, Clone)]
pub struct SensitivityField {
    field: Array3<f64>,
    raw_max: f64,
}

impl SensitivityField {
    /// Back-projects an all-ones acquisition volume and clips the result.
    ///
    /// The ones volume is dropped before this returns.
    pub fn build(
        executor: &dyn VoxelExecutor,
        adjoint: &mut AdjointProjectionOperator<'_>,
        geometry: &SamplingGeometry,
    ) -> Result<Self, DeconvolutionError> {
        let [d0, d1, d2] = geometry.data_shape();
        let [r0, r1, r2] = geometry.reconstruction_shape();
        let mut raw = Array3::zeros((r0, r1, r2));
        {
            let ones = Array3::ones((d0, d1, d2));
            adjoint.apply(executor, ones.view(), &mut raw);
        }
        Self::from_raw(raw)
    }

    /// Clips a raw sensitivity volume at `SENSITIVITY_FLOOR_RATIO * max`.
    pub fn from_raw(mut raw: Array3<f64>) -> Result<Self, DeconvolutionError> {
        let raw_max = max_value(raw.view());
        if !(raw_max.is_finite() && raw_max > 0.0) {
            return Err(DeconvolutionError::DegenerateSensitivity { max: raw_max });
        }
        clip_floor(&mut raw, SENSITIVITY_FLOOR_RATIO * raw_max);
        Ok(SensitivityField {
            field: raw,
            raw_max,
        })
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.field.view()
    }

    /// Maximum of the field before clipping.
    pub fn raw_max(&self) -> f64 {
        self.raw_max
    }

    pub fn floor(&self) -> f64 {
        SENSITIVITY_FLOOR_RATIO * self.raw_max
    }
}
