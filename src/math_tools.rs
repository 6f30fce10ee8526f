//! Element-wise volume arithmetic used between the projection passes.
//!
//! Every helper runs on the Rayon thread pool and returns only after all
//! elements are written.

use ndarray::{Array3, ArrayView3, Zip};
use num_traits::Float;

/// Largest element, ignoring NaN. Returns negative infinity for an empty volume.
pub fn max_value<T: Float>(volume: ArrayView3<T>) -> T {
    volume.fold(T::neg_infinity(), |acc, &v| acc.max(v))
}

/// Raises every element below `floor` to `floor`.
pub fn clip_floor<T: Float + Send + Sync>(volume: &mut Array3<T>, floor: T) {
    volume.par_mapv_inplace(|v| v.max(floor));
}

/// Replaces each predicted value with `measured / predicted`.
///
/// Where the prediction is not positive the ratio is zero: the model does not
/// see that voxel, so it contributes no correction.
pub fn ratio_in_place<T: Float + Send + Sync>(measured: ArrayView3<T>, predicted: &mut Array3<T>) {
    Zip::from(predicted)
        .and(&measured)
        .par_for_each(|p, &m| *p = if *p > T::zero() { m / *p } else { T::zero() });
}

pub fn divide_in_place<T: Float + Send + Sync>(volume: &mut Array3<T>, divisor: ArrayView3<T>) {
    Zip::from(volume)
        .and(&divisor)
        .par_for_each(|v, &d| *v = *v / d);
}

pub fn multiply_in_place<T: Float + Send + Sync>(volume: &mut Array3<T>, factor: ArrayView3<T>) {
    Zip::from(volume)
        .and(&factor)
        .par_for_each(|v, &f| *v = *v * f);
}

/// Index of the first NaN or infinite element in C order.
pub fn first_non_finite<T: Float>(volume: ArrayView3<T>) -> Option<[usize; 3]> {
    volume
        .indexed_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|((z, y, x), _)| [z, y, x])
}
