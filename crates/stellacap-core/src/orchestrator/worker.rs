use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::calibration::store::StoreSummary;
use crate::calibration::{CalibrationApplier, ReferenceStore};
use crate::capture::{CaptureController, CoolingService, SharedCamera, SharedMount};
use crate::config::{AppConfig, CaptureConfig, OpticsConfig, SolverConfig};
use crate::consts::{MIN_SCHEDULER_WAIT, WORKER_JOIN_TIMEOUT};
use crate::error::DeviceError;
use crate::frame::Frame;
use crate::solve::{PlateSolveResult, PlateSolver, SolveHint};
use crate::status::Status;

use super::bright::{BrightBodyGuard, SolveDecision};
use super::gating::MountGate;
use super::persist::FramePersister;
use super::types::{
    CycleObserver, CycleOutcome, CycleReport, CycleState, CycleTimings, OrchestratorStats,
    SavedFrame, SolveOutcome,
};

/// The devices an orchestrator drives. The mount is optional; without one
/// the pointing gates always pass.
#[derive(Clone)]
pub struct Devices {
    pub camera: SharedCamera,
    pub mount: Option<SharedMount>,
}

// State shared between the worker thread and the Orchestrator methods.
#[derive(Default)]
struct WorkerState {
    stop_request: bool,
    running: bool,
    stats: OrchestratorStats,
    observers: Vec<Arc<dyn CycleObserver>>,
    latest_frame: Option<Arc<Frame>>,
    last_solve: Option<PlateSolveResult>,
    exposure_cap: Option<f64>,
    /// Set when the retry budget ran out.
    aborted: Option<String>,
}

struct Shared {
    state: Mutex<WorkerState>,
    // Signalled on stop requests and when the worker exits.
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: CycleState) {
        self.lock().stats.state = state;
    }

    /// Sleep for up to `duration`. Returns `false` if a stop was requested.
    fn pause(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |s| !s.stop_request)
            .unwrap_or_else(|e| e.into_inner());
        !guard.stop_request
    }

    /// Fold a finished cycle into the counters. Returns `true` when the
    /// retry budget is exhausted.
    fn record(&self, report: &CycleReport, max_failures: u32) -> bool {
        let mut state = self.lock();
        let stats = &mut state.stats;
        stats.cycles += 1;
        match &report.outcome {
            CycleOutcome::Skipped(reason) => {
                stats.skipped_cycles += 1;
                stats.last_discard_reason = Some(reason.to_string());
            }
            CycleOutcome::Discarded(reason) => {
                stats.discarded_cycles += 1;
                stats.consecutive_failures = 0;
                stats.last_discard_reason = Some(reason.to_string());
            }
            CycleOutcome::Failed(message) => {
                stats.failed_cycles += 1;
                stats.consecutive_failures += 1;
                stats.last_error = Some(message.clone());
            }
            CycleOutcome::Completed(_) => stats.consecutive_failures = 0,
        }
        if stats.consecutive_failures >= max_failures.max(1) {
            let message = format!(
                "{} consecutive failed cycles; giving up",
                stats.consecutive_failures
            );
            state.aborted = Some(message);
            return true;
        }
        false
    }
}

struct Schedule {
    interval: Duration,
    cooldown: Duration,
    max_failures: u32,
    max_cycles: Option<u64>,
}

/// Everything a cycle touches. Held under one lock so a reference reload
/// never overlaps a calibration.
struct Pipeline {
    capture: CaptureController,
    applier: CalibrationApplier,
    solver: Option<Box<dyn PlateSolver>>,
    mount: Option<SharedMount>,
    gate: MountGate,
    persister: FramePersister,
    bright: BrightBodyGuard,
    capture_config: CaptureConfig,
    solver_config: SolverConfig,
    optics: OpticsConfig,
    last_solve_at: Option<Instant>,
}

impl Pipeline {
    fn run_cycle(
        &mut self,
        shared: &Shared,
        observers: &[Arc<dyn CycleObserver>],
        cycle: u64,
        started: Instant,
    ) -> CycleReport {
        let mut report = CycleReport {
            cycle,
            started,
            outcome: CycleOutcome::Completed(SolveOutcome::Disabled),
            saved: SavedFrame::default(),
            calibration: None,
            timings: CycleTimings::default(),
        };
        report.outcome = self.cycle(shared, observers, &mut report);
        report
    }

    fn cycle(
        &mut self,
        shared: &Shared,
        observers: &[Arc<dyn CycleObserver>],
        report: &mut CycleReport,
    ) -> CycleOutcome {
        shared.set_state(CycleState::PreGate);
        if let Err(reason) = self.gate.pre_capture(self.mount.as_ref(), |d| shared.pause(d)) {
            return CycleOutcome::Skipped(reason);
        }

        shared.set_state(CycleState::Capturing);
        let mut settings = self.capture_config.acquisition_settings();
        let cap = self.bright.exposure_cap(Instant::now());
        shared.lock().exposure_cap = cap;
        if let Some(cap) = cap.filter(|&c| settings.exposure_time > c) {
            info!(requested = settings.exposure_time, cap, "Exposure capped by bright-body override");
            settings.exposure_time = cap;
        }
        let capture_started = Instant::now();
        let captured = self.capture.capture(&settings);
        report.timings.capture = capture_started.elapsed();
        let frame = match captured {
            Ok(frame) => frame,
            Err(e) => {
                let message = format!("Capture failed: {e}");
                error!(cycle = report.cycle, error = %e, "Capture failed");
                for o in observers {
                    o.on_error(&message);
                }
                return CycleOutcome::Failed(message);
            }
        };

        shared.set_state(CycleState::Saving);
        let save_started = Instant::now();
        let outcome = self.applier.apply(&frame);
        report.calibration = Some(outcome.details);
        let frame = Arc::new(outcome.frame);
        report.saved = self.persister.save(&frame);
        report.timings.save = save_started.elapsed();
        {
            let mut state = shared.lock();
            state.latest_frame = Some(frame.clone());
            state.stats.capture_count += 1;
        }
        for o in observers {
            o.on_capture(&frame, &report.saved);
        }

        shared.set_state(CycleState::PostGate);
        if let Err(reason) = self.gate.post_capture(self.mount.as_ref()) {
            let removed = self.persister.discard(&report.saved);
            info!(cycle = report.cycle, removed, %reason, "Capture discarded");
            report.saved = SavedFrame::default();
            return CycleOutcome::Discarded(reason);
        }

        let solve_started = Instant::now();
        let solved = self.solve_step(shared, observers, &report.saved);
        report.timings.solve = solve_started.elapsed();
        info!(
            cycle = report.cycle,
            capture_id = frame.metadata.capture_id,
            capture_ms = report.timings.capture.as_millis() as u64,
            save_ms = report.timings.save.as_millis() as u64,
            solve_ms = report.timings.solve.as_millis() as u64,
            "Cycle timings"
        );
        CycleOutcome::Completed(solved)
    }

    fn solve_step(
        &mut self,
        shared: &Shared,
        observers: &[Arc<dyn CycleObserver>],
        saved: &SavedFrame,
    ) -> SolveOutcome {
        if !self.solver_config.enabled || self.solver.is_none() {
            shared.set_state(CycleState::SkipSolve);
            return SolveOutcome::Disabled;
        }
        let now = Instant::now();
        if let Some(last) = self.last_solve_at {
            let since = now.duration_since(last);
            if since < self.solver_config.min_solve_interval() {
                debug!(?since, "Solve not due");
                shared.set_state(CycleState::SkipSolve);
                return SolveOutcome::NotDue;
            }
        }
        let Some(image) = saved.solve_candidate().cloned() else {
            warn!("No saved frame to solve");
            shared.set_state(CycleState::SkipSolve);
            return SolveOutcome::NoCandidate;
        };

        let center = self.pointing();
        let fov = self.optics.field_of_view_deg();
        if let Some(center) = center {
            if let SolveDecision::Skip(body) = self.bright.assess(center, fov, Utc::now(), now) {
                shared.set_state(CycleState::SkipSolve);
                return SolveOutcome::BrightBodySkip(body);
            }
        }

        shared.set_state(CycleState::Solving);
        let hint = SolveHint {
            ra_deg: center.map(|c| c.0),
            dec_deg: center.map(|c| c.1),
            fov_width_deg: fov.0,
            fov_height_deg: fov.1,
        };
        self.last_solve_at = Some(now);
        shared.lock().stats.solve_count += 1;
        let Some(solver) = self.solver.as_mut() else {
            return SolveOutcome::Disabled;
        };

        match solver.solve(&image, &hint) {
            Ok(result) => {
                self.bright.record_success(&result, Instant::now());
                {
                    let mut state = shared.lock();
                    state.stats.successful_solves += 1;
                    state.last_solve = Some(result.clone());
                }
                for o in observers {
                    o.on_solve(&result);
                }
                SolveOutcome::Solved(result)
            }
            Err(e) => {
                if let Some(last_good) = self.bright.fallback(Instant::now()) {
                    warn!(error = %e, "Solve failed during bright-body override; using last good solution");
                    for o in observers {
                        o.on_solve(&last_good);
                    }
                    return SolveOutcome::LastGood(last_good);
                }
                if e.is_benign() {
                    info!(error = %e, "No plate solution");
                    return SolveOutcome::NoSolution(e.to_string());
                }
                let message = format!("Plate solve failed: {e}");
                error!(error = %e, "Plate solve failed");
                shared.lock().stats.last_error = Some(message.clone());
                for o in observers {
                    o.on_error(&message);
                }
                SolveOutcome::Failed(message)
            }
        }
    }

    /// Current mount pointing, else the centre of the last good solve.
    fn pointing(&self) -> Option<(f64, f64)> {
        if let Some(mount) = &self.mount {
            let coords = mount
                .lock()
                .map_err(|_| DeviceError::NotConnected)
                .and_then(|mut m| m.coordinates());
            match coords {
                Ok(c) => return Some(c),
                Err(e) => debug!(error = %e, "Mount coordinates unavailable"),
            }
        }
        self.bright
            .last_good()
            .map(|r| (r.ra_center, r.dec_center))
    }
}

fn lock_pipeline(pipeline: &Mutex<Pipeline>) -> MutexGuard<'_, Pipeline> {
    pipeline.lock().unwrap_or_else(|e| e.into_inner())
}

fn run_worker(shared: Arc<Shared>, pipeline: Arc<Mutex<Pipeline>>, schedule: Schedule) {
    info!(interval = ?schedule.interval, "Capture worker started");
    let mut cycle = 0u64;
    loop {
        let observers = {
            let state = shared.lock();
            if state.stop_request {
                break;
            }
            state.observers.clone()
        };
        cycle += 1;
        let started = Instant::now();
        for o in &observers {
            o.on_cycle_start(cycle, started);
        }

        let report = lock_pipeline(&pipeline).run_cycle(&shared, &observers, cycle, started);
        debug!(cycle, outcome = ?report.outcome, elapsed = ?started.elapsed(), "Cycle finished");
        let failed = report.outcome.is_failure();
        let exhausted = shared.record(&report, schedule.max_failures);
        for o in &observers {
            o.on_cycle_end(&report);
        }

        if exhausted {
            error!(cycle, "Retry budget exhausted; stopping capture");
            break;
        }
        if schedule.max_cycles.is_some_and(|max| cycle >= max) {
            info!(cycle, "Requested number of cycles completed");
            break;
        }

        let wait = if failed {
            warn!(cooldown = ?schedule.cooldown, "Cycle failed; cooling down before retry");
            schedule.cooldown
        } else {
            schedule.interval.saturating_sub(started.elapsed())
        };
        shared.set_state(CycleState::Waiting);
        if !shared.pause(wait.max(MIN_SCHEDULER_WAIT)) {
            break;
        }
    }

    let mut state = shared.lock();
    state.running = false;
    state.stop_request = false;
    state.stats.running = false;
    state.stats.state = CycleState::Idle;
    info!("Capture worker stopped");
    shared.wake.notify_all();
}

/// Runs the capture-and-solve loop on one background thread.
pub struct Orchestrator {
    config: AppConfig,
    camera: SharedCamera,
    mount: Option<SharedMount>,
    shared: Arc<Shared>,
    pipeline: Arc<Mutex<Pipeline>>,
    worker_thread: Option<JoinHandle<()>>,
    cooling: Option<CoolingService>,
    max_cycles: Option<u64>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        devices: Devices,
        solver: Option<Box<dyn PlateSolver>>,
        applier: CalibrationApplier,
    ) -> Self {
        let capture = CaptureController::new(devices.camera.clone(), &config.capture)
            .with_focal_length(config.optics.focal_length_mm);
        let pipeline = Pipeline {
            capture,
            applier,
            solver,
            mount: devices.mount.clone(),
            gate: MountGate::new(config.gating.clone()),
            persister: FramePersister::new(config.capture.clone()),
            bright: BrightBodyGuard::new(config.bright_body.clone()),
            capture_config: config.capture.clone(),
            solver_config: config.solver.clone(),
            optics: config.optics.clone(),
            last_solve_at: None,
        };
        Self {
            camera: devices.camera,
            mount: devices.mount,
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::default()),
                wake: Condvar::new(),
            }),
            pipeline: Arc::new(Mutex::new(pipeline)),
            worker_thread: None,
            cooling: None,
            max_cycles: None,
            config,
        }
    }

    /// Stop on its own after `cycles` cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start the worker. Calling it while running is a no-op warning.
    pub fn start(&mut self) -> Status<OrchestratorStats> {
        self.reap_worker();
        if self.worker_thread.is_some() {
            return Status::warning("Capture already running", Some(self.stats()));
        }

        let cooling = self.start_cooling();

        {
            let mut state = self.shared.lock();
            state.stop_request = false;
            state.running = true;
            state.aborted = None;
            state.stats.running = true;
            state.stats.consecutive_failures = 0;
            state.stats.state = CycleState::Waiting;
        }
        let schedule = Schedule {
            interval: self.config.capture.interval(),
            cooldown: self.config.retry.cooldown(),
            max_failures: self.config.retry.max_consecutive_failures,
            max_cycles: self.max_cycles,
        };
        let shared = self.shared.clone();
        let pipeline = self.pipeline.clone();
        let spawned = thread::Builder::new()
            .name("stellacap-capture".into())
            .spawn(move || run_worker(shared, pipeline, schedule));
        match spawned {
            Ok(handle) => self.worker_thread = Some(handle),
            Err(e) => {
                let mut state = self.shared.lock();
                state.running = false;
                state.stats.running = false;
                state.stats.state = CycleState::Idle;
                return Status::critical(format!("Failed to start capture worker: {e}"));
            }
        }

        info!(
            interval = self.config.capture.interval_secs,
            exposure = self.config.capture.exposure_time,
            "Capture started"
        );
        let mut status = Status::success("Capture started", self.stats())
            .with_detail("interval_secs", self.config.capture.interval_secs);
        if let Some(c) = cooling {
            status = status.with_detail("cooling", c.message);
        }
        status
    }

    /// Ask the worker to stop and wait for it, bounded. Starts the cooler
    /// warm-up when configured; devices stay connected until `disconnect`.
    pub fn stop(&mut self) -> Status<OrchestratorStats> {
        if self.worker_thread.is_none() {
            return Status::success("Capture not running", self.stats());
        }
        let stopped = self.halt_worker();
        let mut status = if stopped {
            Status::success("Capture stopped", self.stats())
        } else {
            Status::warning("Capture worker did not stop in time", Some(self.stats()))
        };

        if self.config.cooling.warmup_on_stop {
            if let Some(cooling) = self.cooling.as_mut() {
                let warmup = cooling.start_warmup();
                status = status.with_detail("warmup", warmup.message);
            }
        }
        status
    }

    /// Stop, let a running warm-up finish (bounded), then disconnect the
    /// camera and mount.
    pub fn disconnect(&mut self) -> Status {
        let stop = self.stop();
        if let Some(cooling) = self.cooling.as_mut() {
            if cooling.is_warming_up() {
                info!("Waiting for warm-up before disconnecting");
                let waited =
                    cooling.wait_for_warmup_completion(self.config.cooling.stabilization_timeout());
                if !waited.is_success() {
                    warn!(message = %waited.message, "Disconnecting before warm-up finished");
                    cooling.stop_warmup();
                }
            }
        }

        let mut failures = Vec::new();
        match self.camera.lock() {
            Ok(mut camera) => {
                if let Err(e) = camera.disconnect() {
                    failures.push(format!("camera: {e}"));
                }
            }
            Err(_) => failures.push("camera: lock poisoned".to_string()),
        }
        if let Some(mount) = &self.mount {
            match mount.lock() {
                Ok(mut mount) => {
                    if let Err(e) = mount.disconnect() {
                        failures.push(format!("mount: {e}"));
                    }
                }
                Err(_) => failures.push("mount: lock poisoned".to_string()),
            }
        }

        if failures.is_empty() {
            info!("Devices disconnected");
            Status::ok("Devices disconnected").with_detail("stop", stop.message)
        } else {
            warn!(failures = %failures.join("; "), "Disconnect incomplete");
            Status::warning("Some devices failed to disconnect", Some(()))
                .with_detail("failures", failures.join("; "))
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.shared.lock().stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// `Critical` once the retry budget ran out, `Success` otherwise.
    pub fn status(&self) -> Status<OrchestratorStats> {
        let state = self.shared.lock();
        let stats = state.stats.clone();
        let mut status = match &state.aborted {
            Some(reason) => {
                let mut s = Status::critical(reason.clone());
                s.data = Some(stats.clone());
                s
            }
            None if stats.running => Status::success("Capture running", stats.clone()),
            None => Status::success("Capture idle", stats.clone()),
        };
        status = status
            .with_detail("state", stats.state)
            .with_detail("capture_count", stats.capture_count)
            .with_detail("solve_count", stats.solve_count)
            .with_detail("successful_solves", stats.successful_solves);
        if let Some(reason) = &stats.last_discard_reason {
            status = status.with_detail("last_discard_reason", reason);
        }
        if let Some(e) = &stats.last_error {
            status = status.with_detail("last_error", e);
        }
        if let Some(cap) = state.exposure_cap {
            status = status.with_detail("exposure_cap", cap);
        }
        status
    }

    /// Reload master frames from the configured directory. The new store is
    /// read before taking the pipeline lock and swapped in whole.
    pub fn reload_references(&self) -> Status<StoreSummary> {
        let dir = &self.config.calibration.master_dir;
        let store = match ReferenceStore::load(dir) {
            Ok(store) => store,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Master frame reload failed");
                return Status::error(format!("Failed to reload master frames: {e}"));
            }
        };
        let summary = store.summary();
        lock_pipeline(&self.pipeline).applier.replace_store(store);
        info!(dir = %dir.display(), darks = summary.darks.len(), "Master frames reloaded");
        Status::success("Master frames reloaded", summary.clone())
            .with_detail("master_darks_loaded", summary.darks.len())
            .with_detail("master_flat_loaded", summary.flat.is_some())
    }

    /// Replace the observer set.
    pub fn set_observers(&self, observers: Vec<Arc<dyn CycleObserver>>) {
        self.shared.lock().observers = observers;
    }

    pub fn last_solve(&self) -> Option<PlateSolveResult> {
        self.shared.lock().last_solve.clone()
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.lock().latest_frame.clone()
    }

    /// Exposure ceiling applied to the most recent capture, if any.
    pub fn exposure_cap(&self) -> Option<f64> {
        self.shared.lock().exposure_cap
    }

    pub fn cooling(&self) -> Option<&CoolingService> {
        self.cooling.as_ref()
    }

    /// Block until the worker has exited or `timeout` passes.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let guard = self.shared.lock();
        let (guard, _) = self
            .shared
            .wake
            .wait_timeout_while(guard, timeout, |s| s.running)
            .unwrap_or_else(|e| e.into_inner());
        !guard.running
    }

    fn start_cooling(&mut self) -> Option<Status<crate::capture::CoolingStatus>> {
        if !self.config.cooling.enabled {
            return None;
        }
        let cooling = self.cooling.get_or_insert_with(|| {
            CoolingService::new(self.camera.clone(), self.config.cooling.clone())
        });
        if cooling.is_warming_up() {
            cooling.stop_warmup();
        }
        let status = cooling.initialize_and_stabilize();
        if !status.is_ok() {
            warn!(message = %status.message, "Cooling not initialized");
        }
        Some(status)
    }

    /// Request a stop and wait up to the join timeout. Returns `false` if the
    /// worker is still busy, in which case its handle is kept.
    fn halt_worker(&mut self) -> bool {
        let Some(handle) = self.worker_thread.take() else {
            return true;
        };
        {
            let mut state = self.shared.lock();
            state.stop_request = true;
            if state.running {
                state.stats.state = CycleState::Stopping;
            }
        }
        self.shared.wake.notify_all();
        if self.wait_until_stopped(WORKER_JOIN_TIMEOUT) {
            let _ = handle.join();
            true
        } else {
            warn!(timeout = ?WORKER_JOIN_TIMEOUT, "Capture worker did not stop in time");
            self.worker_thread = Some(handle);
            false
        }
    }

    fn reap_worker(&mut self) {
        if self.worker_thread.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.worker_thread.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.halt_worker();
    }
}
