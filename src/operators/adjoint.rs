//! Adjoint (back) projection: distributes acquisition-space values into the
//! reconstruction volume through the same kernel and anchors as the forward
//! projection, in the opposite direction.
//!
//! The pass runs in two gathers. First every padded voxel sums the acquisition
//! values anchored on it, then every reconstruction voxel correlates the binned
//! grid with the kernel. Neither step writes outside its own output voxel.

use crate::data_container::KernelTensor;
use crate::operators::executor::VoxelExecutor;
use crate::operators::geometry::SamplingGeometry;
use ndarray::{s, Array3, ArrayView3, Zip};

/// Value of reconstruction voxel `index` given the binned acquisition values:
/// `sum_t K[t] * binned[index + (k - 1 - t)]`.
pub fn adjoint_voxel(index: [usize; 3], flipped_kernel: ArrayView3<f64>, binned: ArrayView3<f64>) -> f64 {
    let (k0, k1, k2) = flipped_kernel.dim();
    let window = binned.slice(s![
        index[0]..index[0] + k0,
        index[1]..index[1] + k1,
        index[2]..index[2] + k2
    ]);
    Zip::from(&flipped_kernel)
        .and(&window)
        .fold(0.0, |acc, &w, &b| acc + w * b)
}

/// Maps acquisition-space quantities to reconstruction space. Owns the binning
/// scratch volume for its whole lifetime.
pub struct AdjointProjectionOperator<'a> {
    kernel: &'a KernelTensor,
    geometry: &'a SamplingGeometry,
    binned: Array3<f64>,
}

impl<'a> AdjointProjectionOperator<'a> {
    pub fn new(kernel: &'a KernelTensor, geometry: &'a SamplingGeometry) -> Self {
        let [p0, p1, p2] = geometry.padded_shape();
        AdjointProjectionOperator {
            kernel,
            geometry,
            binned: Array3::zeros((p0, p1, p2)),
        }
    }

    /// Writes the back-projection of `quantity` (acquisition shape) into
    /// `canvas` (reconstruction shape).
    pub fn apply(
        &mut self,
        executor: &dyn VoxelExecutor,
        quantity: ArrayView3<f64>,
        canvas: &mut Array3<f64>,
    ) {
        let [d0, d1, d2] = self.geometry.data_shape();
        let [r0, r1, r2] = self.geometry.reconstruction_shape();
        assert_eq!(quantity.dim(), (d0, d1, d2), "quantity shape");
        assert_eq!(canvas.dim(), (r0, r1, r2), "canvas shape");

        let geometry = self.geometry;
        executor.fill(&mut self.binned, &|index| geometry.bin_voxel(index, quantity));

        let flipped = self.kernel.weights().slice_move(s![..;-1, ..;-1, ..;-1]);
        let binned = self.binned.view();
        executor.fill(canvas, &|index| adjoint_voxel(index, flipped, binned));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_container::TransformMatrix;
    use crate::operators::executor::{RayonExecutor, SerialExecutor};
    use crate::operators::forward::ProjectionOperator;
    use approx::assert_relative_eq;
    use ndarray::ShapeBuilder;

    fn pseudo_random(shape: (usize, usize, usize), seed: f64) -> Array3<f64> {
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let t = seed + 12.9898 * z as f64 + 78.233 * y as f64 + 37.719 * x as f64;
            (t.sin() * 43758.5453).fract().abs()
        })
    }

    fn inner(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
        Zip::from(a).and(b).fold(0.0, |acc, &x, &y| acc + x * y)
    }

    fn assert_adjoint_consistent(data_shape: [usize; 3], kernel: KernelTensor, transform: TransformMatrix) {
        let geometry = SamplingGeometry::new(data_shape, &kernel, transform).unwrap();
        let [r0, r1, r2] = geometry.reconstruction_shape();
        let [d0, d1, d2] = data_shape;

        let x = pseudo_random((r0, r1, r2), 1.0);
        let y = pseudo_random((d0, d1, d2), 2.0);

        let executor = RayonExecutor::default();
        let mut forward_x = Array3::zeros((d0, d1, d2));
        ProjectionOperator::new(&kernel, &geometry).apply(&executor, x.view(), &mut forward_x);
        let mut adjoint_y = Array3::zeros((r0, r1, r2));
        AdjointProjectionOperator::new(&kernel, &geometry).apply(&executor, y.view(), &mut adjoint_y);

        assert_relative_eq!(inner(&forward_x, &y), inner(&x, &adjoint_y), max_relative = 1e-10);
    }

    #[test]
    fn test_adjoint_consistency_identity_box_kernel() {
        let kernel = KernelTensor::new(pseudo_random((3, 3, 3), 3.0)).unwrap();
        assert_adjoint_consistent([6, 5, 7], kernel, TransformMatrix::identity());
    }

    #[test]
    fn test_adjoint_consistency_skewed_transform_even_kernel() {
        let kernel = KernelTensor::new(pseudo_random((4, 2, 3), 4.0)).unwrap();
        let m = TransformMatrix::from_rows([[1.7, 0.0, 0.0], [0.0, 1.0, 0.0], [0.6, 0.0, 1.3]])
            .unwrap();
        assert_adjoint_consistent([7, 4, 6], kernel, m);
    }

    #[test]
    fn test_adjoint_consistency_compressing_transform() {
        let kernel = KernelTensor::new(pseudo_random((3, 1, 5), 5.0)).unwrap();
        let m = TransformMatrix::from_rows([[0.4, 0.0, 0.0], [0.0, 0.75, 0.0], [0.0, 0.2, 0.5]])
            .unwrap();
        assert_adjoint_consistent([9, 8, 10], kernel, m);
    }

    #[test]
    fn test_delta_kernel_with_identity_copies_quantity() {
        let kernel = KernelTensor::delta();
        let geometry =
            SamplingGeometry::new([2, 3, 4], &kernel, TransformMatrix::identity()).unwrap();
        let quantity = pseudo_random((2, 3, 4), 6.0);
        let mut canvas = Array3::zeros((2, 3, 4));
        AdjointProjectionOperator::new(&kernel, &geometry).apply(
            &SerialExecutor::default(),
            quantity.view(),
            &mut canvas,
        );
        assert_eq!(canvas, quantity);
    }

    #[test]
    fn test_quantity_layout_does_not_change_back_projection() {
        let kernel = KernelTensor::new(pseudo_random((3, 2, 3), 9.0)).unwrap();
        let m = TransformMatrix::from_rows([[1.4, 0.0, 0.0], [0.0, 1.0, 0.0], [0.3, 0.0, 1.0]])
            .unwrap();
        let geometry = SamplingGeometry::new([5, 4, 6], &kernel, m).unwrap();
        let [r0, r1, r2] = geometry.reconstruction_shape();
        let quantity = pseudo_random((5, 4, 6), 10.0);
        let mut fortran = Array3::zeros((5, 4, 6).f());
        fortran.assign(&quantity);

        let executor = RayonExecutor::default();
        let mut adjoint = AdjointProjectionOperator::new(&kernel, &geometry);
        let mut from_c_order = Array3::zeros((r0, r1, r2));
        adjoint.apply(&executor, quantity.view(), &mut from_c_order);
        let mut from_fortran = Array3::zeros((r0, r1, r2));
        adjoint.apply(&executor, fortran.view(), &mut from_fortran);
        assert_eq!(from_c_order, from_fortran);

        // every binned value is rewritten, nothing leaks between calls
        let mut from_zeros = Array3::zeros((r0, r1, r2));
        adjoint.apply(&executor, Array3::zeros((5, 4, 6)).view(), &mut from_zeros);
        assert!(from_zeros.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_serial_and_parallel_back_projection_agree() {
        let kernel = KernelTensor::new(pseudo_random((3, 3, 3), 7.0)).unwrap();
        let m = TransformMatrix::from_rows([[1.2, 0.0, 0.0], [0.0, 1.0, 0.0], [0.4, 0.0, 0.8]])
            .unwrap();
        let geometry = SamplingGeometry::new([10, 9, 11], &kernel, m).unwrap();
        let [r0, r1, r2] = geometry.reconstruction_shape();
        let quantity = pseudo_random((10, 9, 11), 8.0);

        let mut adjoint = AdjointProjectionOperator::new(&kernel, &geometry);
        let mut serial = Array3::zeros((r0, r1, r2));
        adjoint.apply(&SerialExecutor::default(), quantity.view(), &mut serial);
        let mut parallel = Array3::zeros((r0, r1, r2));
        adjoint.apply(&RayonExecutor::default(), quantity.view(), &mut parallel);

        assert_eq!(serial, parallel);
    }
}
