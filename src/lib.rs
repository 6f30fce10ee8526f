//! Richardson-Lucy style restoration of skewed light-sheet (SOLS) volumes.
//!
//! The crate takes a preprocessed data volume together with a blur kernel and
//! a coordinate transform produced elsewhere, and iteratively restores an
//! isotropic reconstruction volume. See [`Deconvolver`] for the entry point.

pub mod config;
pub mod data_container;
pub mod deconvolution;
pub mod error;
pub mod io;
pub mod math_tools;
pub mod model;
pub mod operators;
pub mod progression;
pub mod sensitivity;

pub use config::{RunFile, RunParameters, SaveOptions, SavePlan};
pub use data_container::{DataVolume, KernelTensor, TransformMatrix};
pub use deconvolution::{Deconvolver, RestorationLoop};
pub use error::{ConfigError, DeconvolutionError, PersistenceError};
pub use io::Deconvolved;
pub use model::{ImageFormationModel, PrecomputedModel};
