//! Multiplicative iterative restoration of a skewed light-sheet acquisition.
//!
//! Every iteration forward-projects the current estimate, divides the data by
//! the prediction, back-projects that ratio and multiplies the estimate by the
//! sensitivity-normalized correction. The update is purely multiplicative, so
//! a non-negative start stays non-negative.

use crate::config::{AlgorithmOptions, RunParameters, SaveOptions, SavePlan};
use crate::data_container::{DataVolume, KernelTensor, TransformMatrix};
use crate::error::{DeconvolutionError, PersistenceError};
use crate::io::{save_run, Deconvolved};
use crate::math_tools::{divide_in_place, first_non_finite, multiply_in_place, ratio_in_place};
use crate::model::ImageFormationModel;
use crate::operators::{
    AdjointProjectionOperator, ProjectionOperator, RayonExecutor, SamplingGeometry, VoxelExecutor,
};
use crate::progression::ProgressionRecorder;
use crate::sensitivity::SensitivityField;
use ndarray::Array3;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use voxel_loops::try_for_each_cancellable;

/// One restoration run over validated inputs.
pub struct RestorationLoop<'a> {
    data: &'a DataVolume,
    kernel: &'a KernelTensor,
    geometry: SamplingGeometry,
    executor: &'a dyn VoxelExecutor,
}

impl<'a> RestorationLoop<'a> {
    pub fn new(
        data: &'a DataVolume,
        kernel: &'a KernelTensor,
        transform: TransformMatrix,
        executor: &'a dyn VoxelExecutor,
    ) -> Result<Self, DeconvolutionError> {
        let geometry = SamplingGeometry::new(data.shape(), kernel, transform)?;
        Ok(RestorationLoop {
            data,
            kernel,
            geometry,
            executor,
        })
    }

    pub fn reconstruction_shape(&self) -> [usize; 3] {
        self.geometry.reconstruction_shape()
    }

    pub fn geometry(&self) -> &SamplingGeometry {
        &self.geometry
    }

    /// Runs `iterations` update cycles starting from an all-ones estimate.
    ///
    /// `recorder` receives the estimate at index 0 (before the first update)
    /// and after every update `k` it selects. The abort flag is polled
    /// between iterations only; an aborted run returns no reconstruction.
    pub fn run(
        &self,
        iterations: usize,
        recorder: &mut ProgressionRecorder,
        progress_lock: &Arc<RwLock<Option<f32>>>,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<Array3<f64>, DeconvolutionError> {
        let forward = ProjectionOperator::new(self.kernel, &self.geometry);
        let mut adjoint = AdjointProjectionOperator::new(self.kernel, &self.geometry);

        let start = Instant::now();
        let sensitivity = SensitivityField::build(self.executor, &mut adjoint, &self.geometry)?;
        log::info!(
            "sensitivity field built in {:?} (max {:.4}, floor {:.4})",
            start.elapsed(),
            sensitivity.raw_max(),
            sensitivity.floor()
        );

        let [r0, r1, r2] = self.geometry.reconstruction_shape();
        let [d0, d1, d2] = self.geometry.data_shape();
        let mut estimate = Array3::<f64>::ones((r0, r1, r2));
        let mut error_canvas = Array3::<f64>::zeros((d0, d1, d2));
        let mut sample_canvas = Array3::<f64>::zeros((r0, r1, r2));

        recorder.record(0, estimate.view());

        log::info!(
            "starting {} iterations on {} executor: data {:?} -> reconstruction {:?}",
            iterations,
            self.executor.name(),
            [d0, d1, d2],
            [r0, r1, r2]
        );

        let mut completed = 0;
        let outcome = try_for_each_cancellable(1..=iterations, abort_flag, |k| {
            let start = Instant::now();
            forward.apply(self.executor, estimate.view(), &mut error_canvas);
            let forward_time = start.elapsed();

            ratio_in_place(self.data.view(), &mut error_canvas);
            log::debug!("iteration {k}: ratio computed");

            let start = Instant::now();
            adjoint.apply(self.executor, error_canvas.view(), &mut sample_canvas);
            let adjoint_time = start.elapsed();

            divide_in_place(&mut sample_canvas, sensitivity.view());
            multiply_in_place(&mut estimate, sample_canvas.view());

            if let Some(index) = first_non_finite(estimate.view()) {
                log::error!("iteration {k}: non-finite estimate at {index:?}");
                return Err(DeconvolutionError::NonFinite { iteration: k });
            }

            recorder.record(k, estimate.view());
            completed = k;

            if let Ok(mut progress) = progress_lock.write() {
                *progress = Some(k as f32 / iterations as f32);
            }
            log::info!(
                "iteration {k}/{iterations}: forward {:?}, adjoint {:?}",
                forward_time,
                adjoint_time
            );
            Ok(())
        });

        if let Ok(mut progress) = progress_lock.write() {
            *progress = None;
        }

        if !outcome? {
            log::warn!("restoration aborted after {completed} of {iterations} iterations");
            return Err(DeconvolutionError::Aborted {
                completed,
                requested: iterations,
            });
        }
        Ok(estimate)
    }
}

/// Entry point of the library: validated parameters, a save plan and the
/// executor that runs the projections.
pub struct Deconvolver {
    parameters: RunParameters,
    options: AlgorithmOptions,
    save_plan: SavePlan,
    executor: Box<dyn VoxelExecutor>,
}

impl Deconvolver {
    /// Validates the algorithm options and the save options. Nothing is
    /// allocated or loaded if either is incomplete.
    pub fn new(
        parameters: RunParameters,
        save_options: &SaveOptions,
    ) -> Result<Self, DeconvolutionError> {
        let options = parameters.algorithm_options()?;
        let save_plan = save_options.validate()?;
        Ok(Deconvolver {
            parameters,
            options,
            save_plan,
            executor: Box::new(RayonExecutor::default()),
        })
    }

    pub fn with_executor(mut self, executor: impl VoxelExecutor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn parameters(&self) -> &RunParameters {
        &self.parameters
    }

    pub fn options(&self) -> &AlgorithmOptions {
        &self.options
    }

    pub fn save_plan(&self) -> &SavePlan {
        &self.save_plan
    }

    /// Restores `data` with the kernel and transform of `model` and writes
    /// the outputs selected by the save plan.
    pub fn deconvolve(
        &self,
        data: &DataVolume,
        model: &dyn ImageFormationModel,
        progress_lock: &Arc<RwLock<Option<f32>>>,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<Deconvolved, DeconvolutionError> {
        if let SavePlan::Enabled(target) = &self.save_plan {
            if !target.folder.is_dir() {
                return Err(PersistenceError::MissingFolder(target.folder.clone()).into());
            }
        }

        let kernel = model.kernel(&self.parameters)?;
        let transform = model.transform(&self.parameters)?;
        let iterations = self.options.iterations;

        let restoration = RestorationLoop::new(data, &kernel, transform, self.executor.as_ref())?;
        let mut recorder = ProgressionRecorder::new(
            self.save_plan.capture_policy(),
            iterations,
            restoration.reconstruction_shape(),
        );
        let reconstruction = restoration.run(iterations, &mut recorder, progress_lock, abort_flag)?;

        let progression = if recorder.is_enabled() {
            Some(recorder.into_stack())
        } else {
            None
        };
        let result = Deconvolved {
            reconstruction,
            progression,
        };

        if let SavePlan::Enabled(target) = &self.save_plan {
            save_run(target, &result, &self.parameters)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProgressionMode, SaveMode};
    use crate::model::PrecomputedModel;
    use crate::operators::SerialExecutor;
    use crate::progression::CapturePolicy;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::Ordering;

    fn controls() -> (Arc<RwLock<Option<f32>>>, Arc<AtomicBool>) {
        (Arc::new(RwLock::new(None)), Arc::new(AtomicBool::new(false)))
    }

    fn disabled_save() -> SaveOptions {
        SaveOptions {
            save_to_disc: Some(false),
            ..SaveOptions::default()
        }
    }

    fn parameters(iterations: usize) -> RunParameters {
        let mut parameters = RunParameters::default();
        parameters
            .algorithm
            .insert("Iterations".to_string(), serde_json::Value::from(iterations));
        parameters
    }

    /// Point source on a faint background, blurred by a 3x3x3 box.
    fn blurred_point_source() -> (DataVolume, KernelTensor) {
        let kernel = KernelTensor::new(Array3::ones((3, 3, 3))).unwrap();
        let mut truth = Array3::from_elem((7, 7, 7), 0.01);
        truth[[3, 3, 3]] = 1.0;
        let geometry = SamplingGeometry::new([7, 7, 7], &kernel, TransformMatrix::identity()).unwrap();
        let mut blurred = Array3::zeros((7, 7, 7));
        ProjectionOperator::new(&kernel, &geometry).apply(
            &RayonExecutor::default(),
            truth.view(),
            &mut blurred,
        );
        (DataVolume::new(blurred).unwrap(), kernel)
    }

    #[test]
    fn test_single_iteration_keeps_consistent_estimate() {
        let data = DataVolume::new(Array3::ones((4, 4, 4))).unwrap();
        let model = PrecomputedModel::new(KernelTensor::delta(), TransformMatrix::identity());
        let (progress, abort) = controls();

        let result = Deconvolver::new(parameters(1), &disabled_save())
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap();

        assert_eq!(result.reconstruction.dim(), (4, 4, 4));
        for value in result.reconstruction.iter() {
            assert_abs_diff_eq!(*value, 1.0, epsilon = 1e-12);
        }
        assert!(result.progression.is_none());
        assert_eq!(*progress.read().unwrap(), None);
    }

    #[test]
    fn test_zero_iterations_return_initial_estimate() {
        let (data, kernel) = blurred_point_source();
        let (progress, abort) = controls();
        let executor = RayonExecutor::default();
        let restoration =
            RestorationLoop::new(&data, &kernel, TransformMatrix::identity(), &executor).unwrap();
        let mut recorder = ProgressionRecorder::new(CapturePolicy::Logarithmic, 0, [7, 7, 7]);

        let estimate = restoration.run(0, &mut recorder, &progress, &abort).unwrap();

        assert_eq!(estimate, Array3::<f64>::ones((7, 7, 7)));
        assert_eq!(recorder.captured_iterations(), &[0]);
    }

    #[test]
    fn test_estimate_stays_non_negative_and_converges_to_point_source() {
        let (data, kernel) = blurred_point_source();
        let (progress, abort) = controls();
        let executor = RayonExecutor::default();
        let restoration =
            RestorationLoop::new(&data, &kernel, TransformMatrix::identity(), &executor).unwrap();
        let mut recorder = ProgressionRecorder::new(CapturePolicy::All, 20, [7, 7, 7]);

        let estimate = restoration.run(20, &mut recorder, &progress, &abort).unwrap();

        assert!(estimate.iter().all(|&v| v >= 0.0));
        let peak = estimate[[3, 3, 3]];
        assert!(estimate
            .indexed_iter()
            .all(|(index, &v)| index == (3, 3, 3) || v < peak));

        // the true source has height 1 over a background of 0.01
        let stack = recorder.into_stack();
        let early = stack.index_axis(ndarray::Axis(0), 4);
        let early_peak = early[[3, 3, 3]];
        assert!((peak - 1.0).abs() < (early_peak - 1.0).abs());
        let contrast = peak / estimate[[3, 3, 2]];
        let early_contrast = early_peak / early[[3, 3, 2]];
        assert!(contrast > early_contrast);
        assert!(contrast > 5.0);
    }

    #[test]
    fn test_skewed_geometry_runs_with_expected_shape() {
        let data = DataVolume::new(Array3::from_elem((3, 4, 5), 2.0)).unwrap();
        let kernel = KernelTensor::new(Array3::ones((2, 3, 1))).unwrap();
        let transform =
            TransformMatrix::from_rows([[1.5, 0.0, 0.0], [0.5, 1.0, 0.0], [0.0, 0.0, 1.0]])
                .unwrap();
        let (progress, abort) = controls();
        let executor = RayonExecutor::default();
        let restoration = RestorationLoop::new(&data, &kernel, transform, &executor).unwrap();
        assert_eq!(restoration.reconstruction_shape(), [5, 6, 5]);

        let mut recorder = ProgressionRecorder::disabled([5, 6, 5]);
        let estimate = restoration.run(3, &mut recorder, &progress, &abort).unwrap();
        assert_eq!(estimate.dim(), (5, 6, 5));
        assert!(estimate.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_logarithmic_recorder_captures_expected_iterations() {
        let (data, kernel) = blurred_point_source();
        let (progress, abort) = controls();
        let executor = RayonExecutor::default();
        let restoration =
            RestorationLoop::new(&data, &kernel, TransformMatrix::identity(), &executor).unwrap();
        let mut recorder = ProgressionRecorder::new(CapturePolicy::Logarithmic, 25, [7, 7, 7]);

        let estimate = restoration.run(25, &mut recorder, &progress, &abort).unwrap();

        assert_eq!(recorder.captured_iterations(), &[9, 16, 21, 24, 25]);
        let stack = recorder.into_stack();
        assert_eq!(stack.dim(), (5, 7, 7, 7));
        assert_eq!(stack.index_axis(ndarray::Axis(0), 4), estimate);
    }

    #[test]
    fn test_abort_flag_stops_before_first_iteration() {
        let (data, kernel) = blurred_point_source();
        let (progress, abort) = controls();
        abort.store(true, Ordering::Relaxed);
        let model = PrecomputedModel::new(kernel, TransformMatrix::identity());

        let err = Deconvolver::new(parameters(5), &disabled_save())
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap_err();

        assert!(matches!(
            err,
            DeconvolutionError::Aborted {
                completed: 0,
                requested: 5
            }
        ));
        assert_eq!(*progress.read().unwrap(), None);
    }

    #[test]
    fn test_non_finite_estimate_fails_the_run() {
        // the ratio 1e300 / 1e-300 overflows in the first iteration
        let data = DataVolume::new(Array3::from_elem((2, 2, 2), 1e300)).unwrap();
        let kernel = KernelTensor::new(Array3::from_elem((1, 1, 1), 1e-300)).unwrap();
        let model = PrecomputedModel::new(kernel, TransformMatrix::identity());
        let (progress, abort) = controls();

        let err = Deconvolver::new(parameters(3), &disabled_save())
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap_err();

        assert!(matches!(err, DeconvolutionError::NonFinite { iteration: 1 }));
        assert_eq!(*progress.read().unwrap(), None);
    }

    #[test]
    fn test_serial_and_parallel_runs_agree() {
        let (data, kernel) = blurred_point_source();
        let model = PrecomputedModel::new(kernel, TransformMatrix::identity());
        let (progress, abort) = controls();

        let parallel = Deconvolver::new(parameters(4), &disabled_save())
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap();
        let serial = Deconvolver::new(parameters(4), &disabled_save())
            .unwrap()
            .with_executor(SerialExecutor::default())
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap();

        assert_eq!(parallel.reconstruction, serial.reconstruction);
    }

    #[test]
    fn test_missing_save_mode_is_rejected_up_front() {
        let save = SaveOptions {
            save_to_disc: Some(true),
            save_folder: Some(".".into()),
            save_name: Some("run".to_string()),
            ..SaveOptions::default()
        };
        assert!(matches!(
            Deconvolver::new(parameters(1), &save),
            Err(DeconvolutionError::Config(_))
        ));
    }

    #[test]
    fn test_missing_folder_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let save = SaveOptions {
            save_to_disc: Some(true),
            save_mode: Some(SaveMode::Final),
            save_folder: Some(dir.path().join("absent")),
            save_name: Some("run".to_string()),
            ..SaveOptions::default()
        };
        let data = DataVolume::new(Array3::ones((2, 2, 2))).unwrap();
        let model = PrecomputedModel::new(KernelTensor::delta(), TransformMatrix::identity());
        let (progress, abort) = controls();

        let err = Deconvolver::new(parameters(1), &save)
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap_err();
        assert!(matches!(
            err,
            DeconvolutionError::Persistence(PersistenceError::MissingFolder(_))
        ));
    }

    #[test]
    fn test_progression_run_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let save = SaveOptions {
            save_to_disc: Some(true),
            save_mode: Some(SaveMode::Progression),
            progression_mode: Some(ProgressionMode::All),
            save_folder: Some(dir.path().to_path_buf()),
            save_name: Some("Run".to_string()),
        };
        let data = DataVolume::new(Array3::ones((3, 3, 3))).unwrap();
        let model = PrecomputedModel::new(KernelTensor::delta(), TransformMatrix::identity());
        let (progress, abort) = controls();

        let result = Deconvolver::new(parameters(3), &save)
            .unwrap()
            .deconvolve(&data, &model, &progress, &abort)
            .unwrap();

        assert_eq!(result.progression.as_ref().map(|s| s.dim()), Some((3, 3, 3, 3)));
        assert!(dir.path().join("Run_DeconvolutionProgression.npy").is_file());
        assert!(dir.path().join("Run_DeconvolutionParameters.json").is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
