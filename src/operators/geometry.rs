//! Sampling geometry shared by the forward and the adjoint projection.
//!
//! Every acquisition voxel `i` is anchored at the reconstruction voxel
//! `a(i) = round(M · i)`. The kernel, centered at `c = k / 2`, spreads from that
//! anchor, so taps of anchors up to `k - 1 - c` voxels before and `c` voxels
//! after the reconstruction volume still reach it. Anchors are therefore binned
//! on a padded grid of shape `Sr + k - 1`; anchors beyond it are dropped.
//!
//! The inverse of the anchor map is stored in compressed form (one offset per
//! padded voxel into a list of acquisition indices), which turns the scatter of
//! the adjoint into a gather: each padded voxel sums its own members.

use crate::data_container::{KernelTensor, TransformMatrix};
use crate::error::DeconvolutionError;
use ndarray::ArrayView3;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct SamplingGeometry {
    transform: TransformMatrix,
    data_shape: [usize; 3],
    reconstruction_shape: [usize; 3],
    kernel_shape: [usize; 3],
    padded_shape: [usize; 3],
    /// `offsets[q]..offsets[q + 1]` are the members of padded voxel `q`.
    offsets: Vec<usize>,
    /// Flat acquisition indices, grouped by padded voxel, ascending within a group.
    members: Vec<usize>,
}

impl SamplingGeometry {
    pub fn new(
        data_shape: [usize; 3],
        kernel: &KernelTensor,
        transform: TransformMatrix,
    ) -> Result<Self, DeconvolutionError> {
        let reconstruction_shape = transform.reconstruction_shape(data_shape)?;
        let kernel_shape = kernel.shape();
        let padded_shape = [0, 1, 2].map(|axis| reconstruction_shape[axis] + kernel_shape[axis] - 1);
        let lead = [0, 1, 2].map(|axis| kernel_shape[axis] - 1 - kernel.center()[axis]);

        let data_len: usize = data_shape.iter().product();
        let slots: Vec<Option<usize>> = (0..data_len)
            .into_par_iter()
            .map(|flat| {
                let anchor = transform.anchor(unflatten(flat, data_shape));
                padded_slot(anchor, lead, padded_shape)
            })
            .collect();

        // counting sort of acquisition voxels by padded slot
        let padded_len: usize = padded_shape.iter().product();
        let mut offsets = vec![0usize; padded_len + 1];
        for slot in slots.iter().flatten() {
            offsets[slot + 1] += 1;
        }
        for q in 1..=padded_len {
            offsets[q] += offsets[q - 1];
        }
        let mut cursor = offsets.clone();
        let mut members = vec![0usize; offsets[padded_len]];
        for (flat, slot) in slots.iter().enumerate() {
            if let Some(q) = slot {
                members[cursor[*q]] = flat;
                cursor[*q] += 1;
            }
        }

        log::debug!(
            "sampling geometry: data {:?} -> reconstruction {:?}, {} of {} voxels anchored",
            data_shape,
            reconstruction_shape,
            members.len(),
            data_len
        );

        Ok(SamplingGeometry {
            transform,
            data_shape,
            reconstruction_shape,
            kernel_shape,
            padded_shape,
            offsets,
            members,
        })
    }

    pub fn data_shape(&self) -> [usize; 3] {
        self.data_shape
    }

    pub fn reconstruction_shape(&self) -> [usize; 3] {
        self.reconstruction_shape
    }

    pub fn kernel_shape(&self) -> [usize; 3] {
        self.kernel_shape
    }

    /// Shape of the binning grid, `Sr + k - 1`.
    pub fn padded_shape(&self) -> [usize; 3] {
        self.padded_shape
    }

    /// Number of acquisition voxels whose kernel reaches the reconstruction volume.
    pub fn anchored_voxels(&self) -> usize {
        self.members.len()
    }

    pub fn anchor(&self, index: [usize; 3]) -> [i64; 3] {
        self.transform.anchor(index)
    }

    /// Sum of `source` (acquisition space) over the members of padded voxel `index`.
    pub fn bin_voxel(&self, index: [usize; 3], source: ArrayView3<f64>) -> f64 {
        let [_, p1, p2] = self.padded_shape;
        let q = (index[0] * p1 + index[1]) * p2 + index[2];
        self.members[self.offsets[q]..self.offsets[q + 1]]
            .iter()
            .map(|&flat| source[unflatten(flat, self.data_shape)])
            .sum()
    }
}

fn unflatten(flat: usize, shape: [usize; 3]) -> [usize; 3] {
    let x = flat % shape[2];
    let y = (flat / shape[2]) % shape[1];
    let z = flat / (shape[1] * shape[2]);
    [z, y, x]
}

fn padded_slot(anchor: [i64; 3], lead: [usize; 3], padded_shape: [usize; 3]) -> Option<usize> {
    let mut slot = 0usize;
    for axis in 0..3 {
        let q = anchor[axis] + lead[axis] as i64;
        if q < 0 || q >= padded_shape[axis] as i64 {
            return None;
        }
        slot = slot * padded_shape[axis] + q as usize;
    }
    Some(slot)
}
