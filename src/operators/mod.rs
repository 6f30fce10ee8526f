//! The projection operator pair of the image formation model.
//!
//! Both directions share one [`geometry::SamplingGeometry`] and one kernel, which
//! makes [`adjoint::AdjointProjectionOperator`] the exact transpose of
//! [`forward::ProjectionOperator`]. The per-voxel computations are plain
//! functions; [`executor::VoxelExecutor`] implementations schedule them.

pub mod adjoint;
pub mod executor;
pub mod forward;
pub mod geometry;

pub use adjoint::AdjointProjectionOperator;
pub use executor::{RayonExecutor, SerialExecutor, VoxelExecutor};
pub use forward::ProjectionOperator;
pub use geometry::SamplingGeometry;
