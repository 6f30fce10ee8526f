//! Scheduling of per-voxel computations over a 3D output volume.
//!
//! Projection operators describe their work as a pure function from an output
//! index to a value; a [`VoxelExecutor`] decides where that function runs. The
//! executors here run on the CPU, another implementation could dispatch the same
//! function to an accelerator.

use ndarray::{Array3, Zip};
use voxel_loops::{fill_tiled, par_fill_tiled, DEFAULT_TILE};

/// Per-voxel function evaluated by an executor.
pub type VoxelFn<'a> = dyn Fn([usize; 3]) -> f64 + Sync + 'a;

/// Evaluates a voxel function for every index of an output volume.
///
/// Implementations must write every element of `out` before returning; callers
/// read the volume right after the call.
pub trait VoxelExecutor: Sync {
    fn fill(&self, out: &mut Array3<f64>, voxel: &VoxelFn<'_>);

    fn name(&self) -> &'static str;
}

/// Runs tiles in parallel on the Rayon thread pool.
#[derive(Debug, Clone, Copy)]
pub struct RayonExecutor {
    pub tile: usize,
}

impl Default for RayonExecutor {
    fn default() -> Self {
        RayonExecutor { tile: DEFAULT_TILE }
    }
}

impl VoxelExecutor for RayonExecutor {
    fn fill(&self, out: &mut Array3<f64>, voxel: &VoxelFn<'_>) {
        let shape = dims(out);
        if let Some(buffer) = out.as_slice_mut() {
            par_fill_tiled(buffer, shape, self.tile, voxel);
            return;
        }
        Zip::indexed(out).par_for_each(|(z, y, x), v| *v = voxel([z, y, x]));
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Runs tiles one after another on the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct SerialExecutor {
    pub tile: usize,
}

impl Default for SerialExecutor {
    fn default() -> Self {
        SerialExecutor { tile: DEFAULT_TILE }
    }
}

impl VoxelExecutor for SerialExecutor {
    fn fill(&self, out: &mut Array3<f64>, voxel: &VoxelFn<'_>) {
        let shape = dims(out);
        if let Some(buffer) = out.as_slice_mut() {
            fill_tiled(buffer, shape, self.tile, voxel);
            return;
        }
        Zip::indexed(out).for_each(|(z, y, x), v| *v = voxel([z, y, x]));
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

fn dims(volume: &Array3<f64>) -> [usize; 3] {
    let (d0, d1, d2) = volume.dim();
    [d0, d1, d2]
}
