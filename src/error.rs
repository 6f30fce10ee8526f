//! Error types of the restoration pipeline.
//!
//! Configuration and precondition errors are raised before the iterative loop
//! allocates its working set; numerical and cancellation errors abort a running
//! loop. No variant ever comes with a partial reconstruction.

use std::path::PathBuf;

/// Invalid or incomplete run configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration field \"{0}\"")]
    MissingField(&'static str),

    #[error("invalid value for \"{field}\": {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors raised while preparing or running a restoration.
#[derive(Debug, thiserror::Error)]
pub enum DeconvolutionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("data volume contains a negative or non-finite value at {index:?}")]
    InvalidData { index: [usize; 3] },

    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    #[error("invalid transform matrix: {0}")]
    InvalidTransform(String),

    #[error("sensitivity field has no positive sample weight (max = {max})")]
    DegenerateSensitivity { max: f64 },

    #[error("reconstruction became non-finite in iteration {iteration}")]
    NonFinite { iteration: usize },

    #[error("restoration aborted after {completed} of {requested} iterations")]
    Aborted { completed: usize, requested: usize },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors of reading inputs and writing run outputs.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("output folder {0:?} does not exist")]
    MissingFolder(PathBuf),

    #[error("failed to write {path:?}: {source}")]
    WriteVolume {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },

    #[error("failed to read {path:?}: {source}")]
    ReadVolume {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("failed to write {path:?}: {source}")]
    WriteParameters {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize run parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}
