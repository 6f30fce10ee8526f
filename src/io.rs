//! Reading `.npy` inputs and writing the results of a run.
//!
//! A run that saves to disc writes exactly two files into the save folder:
//! the volume (`<name>_FinalDeconvolved.npy` or
//! `<name>_DeconvolutionProgression.npy`) and the parameter sidecar
//! `<name>_DeconvolutionParameters.json`.

use crate::config::{OutputKind, RunParameters, SaveTarget};
use crate::error::PersistenceError;
use ndarray::{Array2, Array3, Array4};
use ndarray_npy::{read_npy, write_npy};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FINAL_SUFFIX: &str = "_FinalDeconvolved";
pub const PROGRESSION_SUFFIX: &str = "_DeconvolutionProgression";
pub const PARAMETERS_SUFFIX: &str = "_DeconvolutionParameters";

/// Volumes produced by a run.
#[derive(Debug, Clone)]
pub struct Deconvolved {
    pub reconstruction: Array3<f64>,
    /// Captured snapshots stacked along axis 0, present when progression
    /// capture was enabled.
    pub progression: Option<Array4<f64>>,
}

pub fn read_volume(path: &Path) -> Result<Array3<f64>, PersistenceError> {
    read_npy(path).map_err(|source| PersistenceError::ReadVolume {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_matrix(path: &Path) -> Result<Array2<f64>, PersistenceError> {
    read_npy(path).map_err(|source| PersistenceError::ReadVolume {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the selected volume and the parameter sidecar of a finished run.
///
/// Returns the paths written, volume first.
pub fn save_run(
    target: &SaveTarget,
    result: &Deconvolved,
    parameters: &RunParameters,
) -> Result<Vec<PathBuf>, PersistenceError> {
    if !target.folder.is_dir() {
        return Err(PersistenceError::MissingFolder(target.folder.clone()));
    }

    let volume_path = match target.output {
        OutputKind::Final => {
            let path = output_path(target, FINAL_SUFFIX, "npy");
            write_volume(&path, &result.reconstruction)?;
            path
        }
        OutputKind::Progression(_) => {
            let path = output_path(target, PROGRESSION_SUFFIX, "npy");
            match &result.progression {
                Some(stack) => write_volume(&path, stack)?,
                None => {
                    log::warn!("no progression snapshots were captured, writing an empty stack");
                    let (r0, r1, r2) = result.reconstruction.dim();
                    write_volume(&path, &Array4::<f64>::zeros((0, r0, r1, r2)))?;
                }
            }
            path
        }
    };

    let parameters_path = output_path(target, PARAMETERS_SUFFIX, "json");
    write_parameters(&parameters_path, parameters)?;

    log::info!("saved {:?} and {:?}", volume_path, parameters_path);
    Ok(vec![volume_path, parameters_path])
}

fn output_path(target: &SaveTarget, suffix: &str, extension: &str) -> PathBuf {
    target
        .folder
        .join(format!("{}{}.{}", target.name, suffix, extension))
}

fn write_volume<T>(path: &Path, volume: &T) -> Result<(), PersistenceError>
where
    T: ndarray_npy::WriteNpyExt,
{
    write_npy(path, volume).map_err(|source| PersistenceError::WriteVolume {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the three parameter records as JSON, indented by four spaces.
pub fn write_parameters(path: &Path, parameters: &RunParameters) -> Result<(), PersistenceError> {
    let io_error = |source| PersistenceError::WriteParameters {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    parameters.serialize(&mut serializer)?;
    writer.flush().map_err(io_error)?;
    Ok(())
}
