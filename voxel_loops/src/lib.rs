//! # voxel_loops
//!
//! Small loop utilities for dense 3D volumes stored in C order.
//!
//! The crate provides:
//!
//! - [`TileGrid`], a decomposition of a 3D index space into cubic tiles with
//!   ceil-divided grid dimensions, so the tiles exactly cover the shape
//! - [`fill_tiled`] and [`par_fill_tiled`], which evaluate a per-voxel function
//!   for every index of the space and write the result into a flat buffer,
//!   either on the calling thread or on the Rayon thread pool
//! - [`try_for_each_cancellable`], a sequential loop that stops at the next
//!   item boundary once an abort flag is raised, or on the first error
//!
//! Both fill functions visit the same tiles and call the voxel function with the
//! same indices, so a pure voxel function yields bit-identical buffers whichever
//! one is used. Returning from [`par_fill_tiled`] means every voxel is written.
//!
//! ## Example
//!
//! ```
//! use voxel_loops::{par_fill_tiled, DEFAULT_TILE};
//!
//! let shape = [3, 4, 5];
//! let mut out = vec![0usize; 3 * 4 * 5];
//!
//! par_fill_tiled(&mut out, shape, DEFAULT_TILE, |[z, y, x]| (z * 4 + y) * 5 + x);
//!
//! // every slot holds its own flat index
//! assert!(out.iter().enumerate().all(|(i, v)| i == *v));
//! ```

use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tile edge length used per axis unless a caller asks for another one.
pub const DEFAULT_TILE: usize = 8;

/// Decomposition of a 3D index space into cubic tiles.
///
/// The grid dimensions are the ceil-divided shape, so boundary tiles may be
/// partial but the union of all tiles is exactly the index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    shape: [usize; 3],
    tile: usize,
}

impl TileGrid {
    /// Creates a grid for `shape`. A tile size of zero is treated as one.
    pub fn new(shape: [usize; 3], tile: usize) -> Self {
        TileGrid {
            shape,
            tile: tile.max(1),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn tile(&self) -> usize {
        self.tile
    }

    /// Number of tiles along each axis.
    ///
    /// ```
    /// use voxel_loops::TileGrid;
    ///
    /// let grid = TileGrid::new([17, 8, 1], 8);
    /// assert_eq!(grid.dims(), [3, 1, 1]);
    /// ```
    pub fn dims(&self) -> [usize; 3] {
        self.shape.map(|n| n.div_ceil(self.tile))
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index ranges covered by the tile at grid position `tile_index`.
    pub fn tile_bounds(&self, tile_index: [usize; 3]) -> [Range<usize>; 3] {
        let mut bounds = [0..0, 0..0, 0..0];
        for axis in 0..3 {
            let start = (tile_index[axis] * self.tile).min(self.shape[axis]);
            let end = (start + self.tile).min(self.shape[axis]);
            bounds[axis] = start..end;
        }
        bounds
    }

    /// Iterates over all grid positions in C order.
    pub fn tiles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let [g0, g1, g2] = self.dims();
        (0..g0).flat_map(move |tz| (0..g1).flat_map(move |ty| (0..g2).map(move |tx| [tz, ty, tx])))
    }

    /// Number of buffer elements in one slab, i.e. one layer of tiles along axis 0.
    fn slab_len(&self) -> usize {
        self.tile * self.shape[1] * self.shape[2]
    }
}

/// Evaluates `func` for every index of `shape` on the calling thread, writing the
/// results into `out` (C order).
///
/// # Panics
///
/// Panics if `out.len()` is not the number of elements in `shape`.
///
/// # Examples
///
/// ```
/// use voxel_loops::fill_tiled;
///
/// let mut visited = 0;
/// let mut out = vec![0.0f64; 2 * 3 * 4];
/// fill_tiled(&mut out, [2, 3, 4], 2, |[z, _, _]| {
///     visited += 1;
///     z as f64
/// });
///
/// assert_eq!(visited, 24);
/// assert_eq!(out[0], 0.0);
/// assert_eq!(out[23], 1.0);
/// ```
pub fn fill_tiled<T, F>(out: &mut [T], shape: [usize; 3], tile: usize, mut func: F)
where
    F: FnMut([usize; 3]) -> T,
{
    let grid = checked_grid(out.len(), shape, tile);
    let slab_len = grid.slab_len();
    if slab_len == 0 || out.is_empty() {
        return;
    }
    for (slab, chunk) in out.chunks_mut(slab_len).enumerate() {
        fill_slab(chunk, slab, &grid, &mut func);
    }
}

/// Evaluates `func` for every index of `shape` on the Rayon thread pool, writing
/// the results into `out` (C order).
///
/// Work is split into slabs of tiles along axis 0; each slab is a contiguous part
/// of `out`, so no two workers ever touch the same element. The call returns only
/// after every element has been written.
///
/// # Panics
///
/// Panics if `out.len()` is not the number of elements in `shape`.
pub fn par_fill_tiled<T, F>(out: &mut [T], shape: [usize; 3], tile: usize, func: F)
where
    T: Send,
    F: Fn([usize; 3]) -> T + Sync,
{
    let grid = checked_grid(out.len(), shape, tile);
    let slab_len = grid.slab_len();
    if slab_len == 0 || out.is_empty() {
        return;
    }
    out.par_chunks_mut(slab_len)
        .enumerate()
        .for_each(|(slab, chunk)| fill_slab(chunk, slab, &grid, &mut |index| func(index)));
}

fn checked_grid(len: usize, shape: [usize; 3], tile: usize) -> TileGrid {
    let expected: usize = shape.iter().product();
    assert_eq!(
        len, expected,
        "buffer of length {len} does not match shape {shape:?}"
    );
    TileGrid::new(shape, tile)
}

/// Fills the tiles of slab `slab`, whose elements start at `chunk[0]`.
fn fill_slab<T, F>(chunk: &mut [T], slab: usize, grid: &TileGrid, func: &mut F)
where
    F: FnMut([usize; 3]) -> T,
{
    let [_, d1, d2] = grid.shape;
    let [_, g1, g2] = grid.dims();
    let z0 = slab * grid.tile;
    for ty in 0..g1 {
        for tx in 0..g2 {
            let [zs, ys, xs] = grid.tile_bounds([slab, ty, tx]);
            for z in zs {
                for y in ys.clone() {
                    let row = ((z - z0) * d1 + y) * d2;
                    for x in xs.clone() {
                        chunk[row + x] = func([z, y, x]);
                    }
                }
            }
        }
    }
}

/// Executes a sequential, fallible loop that can be cancelled via an abort flag.
///
/// The flag is checked before every item, never while `func` runs, so an item is
/// either processed completely or not at all. The first error returned by `func`
/// ends the loop. The flag is left untouched; the owner of the flag resets it.
///
/// # Returns
///
/// `Ok(true)` if the iterator was exhausted, `Ok(false)` if the loop stopped on
/// the flag, or the first error of `func`.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use voxel_loops::try_for_each_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let mut sum = 0;
///
/// let finished = try_for_each_cancellable(1..=10, &abort_flag, |i| {
///     sum += i;
///     if sum >= 15 {
///         abort_flag.store(true, Ordering::Relaxed);
///     }
///     Ok::<(), String>(())
/// });
///
/// assert_eq!(finished, Ok(false));
/// assert_eq!(sum, 15);
///
/// let failed = try_for_each_cancellable(1..=10, &AtomicBool::new(false), |i| {
///     if i == 3 { Err(i) } else { Ok(()) }
/// });
/// assert_eq!(failed, Err(3));
/// ```
pub fn try_for_each_cancellable<I, F, T, E>(
    iter: I,
    abort_flag: &AtomicBool,
    mut func: F,
) -> Result<bool, E>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Result<(), E>,
{
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return Ok(false);
        }
        func(item)?;
    }
    Ok(true)
}
