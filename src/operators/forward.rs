//! Forward projection: what the acquisition would record for a given estimate.

use crate::data_container::KernelTensor;
use crate::operators::executor::VoxelExecutor;
use crate::operators::geometry::SamplingGeometry;
use ndarray::{s, Array3, ArrayView3, Zip};

/// Value of acquisition voxel `index` for the reconstruction `estimate`: the
/// kernel-weighted sum of the estimate around the voxel's anchor. Taps outside
/// the reconstruction volume contribute nothing.
pub fn forward_voxel(
    index: [usize; 3],
    kernel: ArrayView3<f64>,
    geometry: &SamplingGeometry,
    estimate: ArrayView3<f64>,
) -> f64 {
    let anchor = geometry.anchor(index);
    let reconstruction = geometry.reconstruction_shape();
    let kernel_shape = geometry.kernel_shape();

    // tap t reaches reconstruction voxel anchor + t - c
    let mut taps = [(0usize, 0usize); 3];
    let mut start = [0usize; 3];
    for axis in 0..3 {
        let offset = anchor[axis] - (kernel_shape[axis] / 2) as i64;
        let first = (-offset).max(0);
        let end = (reconstruction[axis] as i64 - offset).min(kernel_shape[axis] as i64);
        if first >= end {
            return 0.0;
        }
        taps[axis] = (first as usize, end as usize);
        start[axis] = (offset + first) as usize;
    }
    let len = taps.map(|(first, end)| end - first);

    let weights = kernel.slice(s![taps[0].0..taps[0].1, taps[1].0..taps[1].1, taps[2].0..taps[2].1]);
    let neighborhood = estimate.slice(s![
        start[0]..start[0] + len[0],
        start[1]..start[1] + len[1],
        start[2]..start[2] + len[2]
    ]);
    Zip::from(&weights)
        .and(&neighborhood)
        .fold(0.0, |acc, &w, &x| acc + w * x)
}

/// Maps reconstruction-space estimates to acquisition space.
pub struct ProjectionOperator<'a> {
    kernel: &'a KernelTensor,
    geometry: &'a SamplingGeometry,
}

impl<'a> ProjectionOperator<'a> {
    pub fn new(kernel: &'a KernelTensor, geometry: &'a SamplingGeometry) -> Self {
        ProjectionOperator { kernel, geometry }
    }

    /// Writes the projection of `estimate` into `canvas`, which must have the
    /// acquisition shape.
    pub fn apply(
        &self,
        executor: &dyn VoxelExecutor,
        estimate: ArrayView3<f64>,
        canvas: &mut Array3<f64>,
    ) {
        let [r0, r1, r2] = self.geometry.reconstruction_shape();
        let [d0, d1, d2] = self.geometry.data_shape();
        assert_eq!(estimate.dim(), (r0, r1, r2), "estimate shape");
        assert_eq!(canvas.dim(), (d0, d1, d2), "canvas shape");

        let kernel = self.kernel.weights();
        let geometry = self.geometry;
        executor.fill(canvas, &|index| forward_voxel(index, kernel, geometry, estimate));
    }
}
