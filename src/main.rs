use anyhow::{bail, Context};
use flexi_logger::Logger;
use sols_deconvolver::io::read_volume;
use sols_deconvolver::{DataVolume, Deconvolver, PrecomputedModel, RunFile};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn load_run_file(path: &Path) -> anyhow::Result<RunFile> {
    let file = File::open(path).with_context(|| format!("cannot open run file {path:?}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("cannot parse run file {path:?}"))
}

/// Fraction to report when the shared progress moved since the last report.
fn progress_update(last_reported: Option<f32>, current: Option<f32>) -> Option<f32> {
    current.filter(|fraction| Some(*fraction) != last_reported)
}

fn main() -> anyhow::Result<()> {
    let _logger = Logger::try_with_env_or_str("info")?.start()?;

    let Some(run_path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: sols-deconvolve <run-file.json>");
    };
    let run = load_run_file(&run_path)?;

    // configuration errors are reported before any volume is loaded
    let deconvolver = Deconvolver::new(run.parameters.clone(), &run.save_options)?;
    log::info!("save plan: {:?}", deconvolver.save_plan());

    let data = DataVolume::new(read_volume(&run.data_file)?)?;
    log::info!("loaded data {:?} from {:?}", data.shape(), run.data_file);
    let model = PrecomputedModel::from_files(&run.kernel_file, &run.transform_file)?;

    let progress_lock: Arc<RwLock<Option<f32>>> = Arc::new(RwLock::new(None));
    let abort_flag = Arc::new(AtomicBool::new(false));

    let result = thread::scope(|scope| {
        let worker = scope.spawn(|| deconvolver.deconvolve(&data, &model, &progress_lock, &abort_flag));
        let mut last_reported = None;
        while !worker.is_finished() {
            if let Ok(progress) = progress_lock.read() {
                if let Some(fraction) = progress_update(last_reported, *progress) {
                    log::info!("progress {:.0} %", fraction * 100.0);
                    last_reported = Some(fraction);
                }
            }
            thread::sleep(PROGRESS_INTERVAL);
        }
        worker.join()
    });

    let deconvolved = match result {
        Ok(outcome) => outcome?,
        Err(_) => bail!("deconvolution thread panicked"),
    };
    log::info!(
        "reconstruction {:?} done{}",
        deconvolved.reconstruction.dim(),
        deconvolved
            .progression
            .as_ref()
            .map(|stack| format!(", {} progression snapshots", stack.dim().0))
            .unwrap_or_default()
    );
    Ok(())
}
