//! Seam to the collaborators that synthesize the image formation model.
//!
//! Kernel synthesis (from the optical PSF and the light-sheet profiles) and
//! transform synthesis (from the scan and tilt geometry) happen outside this
//! crate. The restoration only needs their results.

use crate::config::RunParameters;
use crate::data_container::{KernelTensor, TransformMatrix};
use crate::error::DeconvolutionError;
use crate::io::{read_matrix, read_volume};
use std::path::Path;

/// Produces the kernel and the transform for a run.
pub trait ImageFormationModel {
    fn kernel(&self, parameters: &RunParameters) -> Result<KernelTensor, DeconvolutionError>;

    fn transform(&self, parameters: &RunParameters)
        -> Result<TransformMatrix, DeconvolutionError>;
}

/// Kernel and transform computed ahead of time, e.g. by a separate tool.
#[derive(Debug, Clone)]
pub struct PrecomputedModel {
    kernel: KernelTensor,
    transform: TransformMatrix,
}

impl PrecomputedModel {
    pub fn new(kernel: KernelTensor, transform: TransformMatrix) -> Self {
        PrecomputedModel { kernel, transform }
    }

    /// Reads a 3D kernel and a 3x3 transform from `.npy` files.
    pub fn from_files(
        kernel_path: &Path,
        transform_path: &Path,
    ) -> Result<Self, DeconvolutionError> {
        let kernel = KernelTensor::new(read_volume(kernel_path)?)?;
        let transform = TransformMatrix::from_array(&read_matrix(transform_path)?)?;
        log::info!(
            "loaded kernel {:?} from {:?} and transform from {:?}",
            kernel.shape(),
            kernel_path,
            transform_path
        );
        Ok(Self::new(kernel, transform))
    }
}

impl ImageFormationModel for PrecomputedModel {
    fn kernel(&self, _parameters: &RunParameters) -> Result<KernelTensor, DeconvolutionError> {
        Ok(self.kernel.clone())
    }

    fn transform(
        &self,
        _parameters: &RunParameters,
    ) -> Result<TransformMatrix, DeconvolutionError> {
        Ok(self.transform)
    }
}
