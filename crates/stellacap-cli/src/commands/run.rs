use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use stellacap_core::calibration::CalibrationApplier;
use stellacap_core::capture::{share_camera, share_mount, SimulatedCamera, SimulatedMount};
use stellacap_core::orchestrator::{
    CycleObserver, CycleOutcome, CycleReport, Devices, Orchestrator, OrchestratorStats,
};
use stellacap_core::solve::{PlateSolve2, PlateSolveResult, PlateSolver};
use stellacap_core::status::StatusLevel;

use crate::summary::{print_run_header, print_run_summary};

#[derive(Args)]
pub struct RunArgs {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many cycles (default: run until Ctrl-C)
    #[arg(short = 'n', long)]
    pub cycles: Option<u64>,

    /// Override the capture interval in seconds
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Override the exposure time in seconds
    #[arg(short, long)]
    pub exposure: Option<f64>,

    /// Output directory for captured frames
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Simulated sensor width
    #[arg(long, default_value_t = 640)]
    pub width: usize,

    /// Simulated sensor height
    #[arg(long, default_value_t = 480)]
    pub height: usize,

    /// Simulated mount right ascension in degrees
    #[arg(long, default_value_t = 83.8)]
    pub ra: f64,

    /// Simulated mount declination in degrees
    #[arg(long, default_value_t = -5.4)]
    pub dec: f64,

    /// Write the final counters and last solution to this TOML file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunReport {
    stats: OrchestratorStats,
    last_solve: Option<PlateSolveResult>,
}

struct ConsoleObserver;

impl CycleObserver for ConsoleObserver {
    fn on_solve(&self, result: &PlateSolveResult) {
        println!(
            "  solved  RA {:.4}°  Dec {:+.4}°  PA {:.2}°",
            result.ra_center, result.dec_center, result.position_angle
        );
    }

    fn on_cycle_end(&self, report: &CycleReport) {
        let outcome = match &report.outcome {
            CycleOutcome::Skipped(reason) => format!("skipped ({reason})"),
            CycleOutcome::Discarded(reason) => format!("discarded ({reason})"),
            CycleOutcome::Completed(solve) => format!("captured, solve {solve}"),
            CycleOutcome::Failed(message) => format!("failed: {message}"),
        };
        println!("Cycle {:>4}  {}", report.cycle, outcome);
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(interval) = args.interval {
        config.capture.interval_secs = interval;
    }
    if let Some(exposure) = args.exposure {
        config.capture.exposure_time = exposure;
    }
    if let Some(ref dir) = args.output {
        config.capture.output_dir = dir.clone();
    }
    config.validate()?;

    let camera = SimulatedCamera::new(args.width, args.height).with_cooler(20.0);
    let mount = SimulatedMount::new(args.ra, args.dec);
    let devices = Devices {
        camera: share_camera(camera),
        mount: Some(share_mount(mount)),
    };

    let applier = CalibrationApplier::from_config(&config.calibration).with_context(|| {
        format!(
            "Failed to load masters from {}",
            config.calibration.master_dir.display()
        )
    })?;
    let solver: Option<Box<dyn PlateSolver>> = config
        .solver
        .enabled
        .then(|| Box::new(PlateSolve2::new(config.solver.clone())) as Box<dyn PlateSolver>);

    print_run_header(&config);

    let mut orchestrator = Orchestrator::new(config, devices, solver, applier);
    if let Some(cycles) = args.cycles {
        orchestrator = orchestrator.with_max_cycles(cycles);
    }
    orchestrator.set_observers(vec![Arc::new(ConsoleObserver)]);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    let started = orchestrator.start();
    if started.level >= StatusLevel::Error {
        bail!("{}", started.message);
    }
    println!("{} (Ctrl-C to stop)", started.message);

    while !orchestrator.wait_until_stopped(Duration::from_millis(250)) {
        if interrupted.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }
    }

    let status = orchestrator.status();
    let stopped = orchestrator.disconnect();
    println!("{}", stopped.message);
    let stats = orchestrator.stats();
    print_run_summary(&stats);

    if let Some(ref path) = args.report {
        let report = RunReport {
            stats,
            last_solve: orchestrator.last_solve(),
        };
        let text = toml::to_string_pretty(&report).context("Failed to serialize run report")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if status.level == StatusLevel::Critical {
        bail!("{}", status.message);
    }
    Ok(())
}
