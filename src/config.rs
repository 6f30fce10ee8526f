//! Parameter records of a restoration run and the validation of the save options.
//!
//! The records serialize with human-readable keys so a run file and the
//! parameter sidecar written next to the results can be read and edited by hand.
//! They pass through a run untouched; only the algorithmic record is read here.

use crate::error::ConfigError;
use crate::progression::CapturePolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Properties of the acquired data, as handed to the data loader and the
/// kernel/transform collaborators.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DataProperties {
    #[serde(rename = "Camera pixel size [nm]")]
    pub camera_pixel_size_nm: f64,
    #[serde(rename = "Camera offset")]
    pub camera_offset: u32,
    #[serde(rename = "Scan step size [nm]")]
    pub scan_step_size_nm: f64,
    #[serde(rename = "Tilt angle [deg]")]
    pub tilt_angle_deg: f64,
    #[serde(rename = "Scan axis")]
    pub scan_axis: usize,
    #[serde(rename = "Tilt axis")]
    pub tilt_axis: usize,
    #[serde(rename = "Data stacking")]
    pub data_stacking: String,
    #[serde(rename = "Planes in cycle")]
    pub planes_in_cycle: usize,
    #[serde(rename = "Cycles")]
    pub cycles: usize,
    #[serde(rename = "Pos/Neg scan direction")]
    pub scan_direction: String,
    #[serde(rename = "Correct first cycle")]
    pub correct_first_cycle: bool,
    #[serde(rename = "Correct pixel offsets")]
    pub correct_pixel_offsets: bool,
}

impl Default for DataProperties {
    fn default() -> Self {
        DataProperties {
            camera_pixel_size_nm: 95.7,
            camera_offset: 200,
            scan_step_size_nm: 105.0,
            tilt_angle_deg: 35.0,
            scan_axis: 0,
            tilt_axis: 2,
            data_stacking: "PLSR Interleaved".to_string(),
            planes_in_cycle: 20,
            cycles: 20,
            scan_direction: "Pos".to_string(),
            correct_first_cycle: true,
            correct_pixel_offsets: true,
        }
    }
}

/// Physical parameters of the image formation model. Only the kernel
/// collaborator reads them; the restoration passes them through untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageFormationParameters {
    #[serde(rename = "Optical PSF path")]
    pub optical_psf_path: PathBuf,
    #[serde(rename = "Confined sheet FWHM [nm]")]
    pub confined_sheet_fwhm_nm: f64,
    #[serde(rename = "Read-out sheet FWHM [nm]")]
    pub readout_sheet_fwhm_nm: f64,
    #[serde(rename = "Background sheet ratio")]
    pub background_sheet_ratio: f64,
}

impl Default for ImageFormationParameters {
    fn default() -> Self {
        ImageFormationParameters {
            optical_psf_path: PathBuf::from("psf.npy"),
            confined_sheet_fwhm_nm: 200.0,
            readout_sheet_fwhm_nm: 1200.0,
            background_sheet_ratio: 0.1,
        }
    }
}

/// Options of the restoration algorithm.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlgorithmOptions {
    /// Read by the transform collaborator.
    #[serde(rename = "Reconstruction voxel size [nm]")]
    pub reconstruction_voxel_size_nm: f64,
    /// Read by the kernel collaborator.
    #[serde(rename = "Clip factor for kernel cropping")]
    pub kernel_clip_factor: f64,
    #[serde(rename = "Iterations")]
    pub iterations: usize,
}

impl Default for AlgorithmOptions {
    fn default() -> Self {
        AlgorithmOptions {
            reconstruction_voxel_size_nm: 50.0,
            kernel_clip_factor: 0.01,
            iterations: 25,
        }
    }
}

impl AlgorithmOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_finite(
            "Reconstruction voxel size [nm]",
            self.reconstruction_voxel_size_nm,
        )?;
        positive_finite("Clip factor for kernel cropping", self.kernel_clip_factor)
    }
}

fn positive_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: format!("expected a positive finite number, got {value}"),
        })
    }
}

/// A parameter record exactly as it was read, keys in input order.
pub type Record = Map<String, Value>;

/// The three parameter records of a run, in the layout of the parameter sidecar.
///
/// The records are carried as read, so keys this crate does not know about
/// and the original number formatting reach the sidecar unchanged. The typed
/// views are parsed on demand.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunParameters {
    #[serde(rename = "Data Parameters")]
    pub data: Record,
    #[serde(rename = "Image formation model parameters")]
    pub image_formation: Record,
    #[serde(rename = "Algorithmic parameters")]
    pub algorithm: Record,
}

impl Default for RunParameters {
    fn default() -> Self {
        RunParameters::from_typed(
            &DataProperties::default(),
            &ImageFormationParameters::default(),
            &AlgorithmOptions::default(),
        )
    }
}

impl RunParameters {
    pub fn from_typed(
        data: &DataProperties,
        image_formation: &ImageFormationParameters,
        algorithm: &AlgorithmOptions,
    ) -> Self {
        RunParameters {
            data: to_record(data),
            image_formation: to_record(image_formation),
            algorithm: to_record(algorithm),
        }
    }

    pub fn data_properties(&self) -> Result<DataProperties, ConfigError> {
        from_record("Data Parameters", &self.data)
    }

    pub fn image_formation_parameters(&self) -> Result<ImageFormationParameters, ConfigError> {
        from_record("Image formation model parameters", &self.image_formation)
    }

    /// Parses and validates the algorithmic record.
    pub fn algorithm_options(&self) -> Result<AlgorithmOptions, ConfigError> {
        let options: AlgorithmOptions = from_record("Algorithmic parameters", &self.algorithm)?;
        options.validate()?;
        Ok(options)
    }
}

fn to_record<T: Serialize>(typed: &T) -> Record {
    match serde_json::to_value(typed) {
        Ok(Value::Object(record)) => record,
        _ => Record::new(),
    }
}

fn from_record<T: DeserializeOwned>(field: &'static str, record: &Record) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(record.clone())).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    Final,
    Progression,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressionMode {
    All,
    Logarithmic,
}

/// Save options as they are written in a run file. Every field may be absent;
/// [`SaveOptions::validate`] decides which ones are required.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SaveOptions {
    #[serde(rename = "Save to disc", default, skip_serializing_if = "Option::is_none")]
    pub save_to_disc: Option<bool>,
    #[serde(rename = "Save mode", default, skip_serializing_if = "Option::is_none")]
    pub save_mode: Option<SaveMode>,
    #[serde(rename = "Progression mode", default, skip_serializing_if = "Option::is_none")]
    pub progression_mode: Option<ProgressionMode>,
    #[serde(rename = "Save folder", default, skip_serializing_if = "Option::is_none")]
    pub save_folder: Option<PathBuf>,
    #[serde(rename = "Save name", default, skip_serializing_if = "Option::is_none")]
    pub save_name: Option<String>,
}

/// Which volume a run writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Final,
    Progression(ProgressionMode),
}

/// Where and what a run writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveTarget {
    pub output: OutputKind,
    pub folder: PathBuf,
    pub name: String,
}

/// Validated save options. An undefined mode cannot be represented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SavePlan {
    Disabled,
    Enabled(SaveTarget),
}

impl SavePlan {
    /// Snapshot policy the restoration loop has to follow for this plan.
    pub fn capture_policy(&self) -> CapturePolicy {
        match self {
            SavePlan::Enabled(SaveTarget {
                output: OutputKind::Progression(ProgressionMode::All),
                ..
            }) => CapturePolicy::All,
            SavePlan::Enabled(SaveTarget {
                output: OutputKind::Progression(ProgressionMode::Logarithmic),
                ..
            }) => CapturePolicy::Logarithmic,
            _ => CapturePolicy::Disabled,
        }
    }
}

impl SaveOptions {
    /// Checks that every field needed by the requested output is present.
    ///
    /// Fields that the requested output does not need are ignored, e.g. a
    /// progression mode next to `"Save mode": "Final"`.
    pub fn validate(&self) -> Result<SavePlan, ConfigError> {
        let save_to_disc = self
            .save_to_disc
            .ok_or(ConfigError::MissingField("Save to disc"))?;
        if !save_to_disc {
            return Ok(SavePlan::Disabled);
        }

        let output = match self.save_mode.ok_or(ConfigError::MissingField("Save mode"))? {
            SaveMode::Final => OutputKind::Final,
            SaveMode::Progression => OutputKind::Progression(
                self.progression_mode
                    .ok_or(ConfigError::MissingField("Progression mode"))?,
            ),
        };
        let folder = self
            .save_folder
            .clone()
            .ok_or(ConfigError::MissingField("Save folder"))?;
        let name = self
            .save_name
            .clone()
            .ok_or(ConfigError::MissingField("Save name"))?;
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "Save name",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(SavePlan::Enabled(SaveTarget {
            output,
            folder,
            name,
        }))
    }
}

/// A complete run description as read by the command-line driver.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunFile {
    /// Preprocessed data volume (`.npy`, 3D).
    #[serde(rename = "Data file")]
    pub data_file: PathBuf,
    /// Kernel tensor (`.npy`, 3D), already cropped.
    #[serde(rename = "Kernel file")]
    pub kernel_file: PathBuf,
    /// Transform matrix (`.npy`, 3x3).
    #[serde(rename = "Transform file")]
    pub transform_file: PathBuf,
    #[serde(flatten)]
    pub parameters: RunParameters,
    #[serde(rename = "Save options", default)]
    pub save_options: SaveOptions,
}
