mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::tempdir;

use stellacap_core::calibration::CalibrationApplier;
use stellacap_core::capture::{share_camera, share_mount, SimulatedCamera, SimulatedMount};
use stellacap_core::config::{AppConfig, SlewPolicy};
use stellacap_core::error::SolveError;
use stellacap_core::frame::FrameType;
use stellacap_core::io::naming::master_dark_name;
use stellacap_core::orchestrator::{
    CycleObserver, CycleOutcome, CycleState, Devices, GateReason, Orchestrator, SolveOutcome,
};
use stellacap_core::solve::ephemeris::body_position;
use stellacap_core::solve::{BrightBody, PlateSolver};
use stellacap_core::status::StatusLevel;

use common::{fast_config, files_in, settings, solve_result, uniform, write_frame, MockSolver, Recorder};

const WAIT: Duration = Duration::from_secs(10);

fn orchestrator(
    config: AppConfig,
    camera: SimulatedCamera,
    mount: Option<SimulatedMount>,
    solver: Option<MockSolver>,
) -> Orchestrator {
    let applier = CalibrationApplier::from_config(&config.calibration).unwrap();
    let devices = Devices {
        camera: share_camera(camera),
        mount: mount.map(share_mount),
    };
    let solver = solver.map(|s| Box::new(s) as Box<dyn PlateSolver>);
    Orchestrator::new(config, devices, solver, applier)
}

fn camera() -> SimulatedCamera {
    SimulatedCamera::new(32, 24)
}

fn run_to_end(orch: &mut Orchestrator, recorder: &Arc<Recorder>) {
    orch.set_observers(vec![recorder.clone() as Arc<dyn CycleObserver>]);
    let started = orch.start();
    assert!(started.is_success(), "{}", started.message);
    assert!(orch.wait_until_stopped(WAIT), "worker did not finish");
}

#[test]
fn test_cycles_capture_save_and_solve() {
    let dir = tempdir().unwrap();
    let solver = MockSolver::solving(solve_result(83.8, -5.4));
    let calls = solver.calls.clone();
    let solved = solver.solved.clone();
    let mut orch = orchestrator(
        fast_config(dir.path()),
        camera(),
        Some(SimulatedMount::new(83.8, -5.4)),
        Some(solver),
    )
    .with_max_cycles(3);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let stats = orch.stats();
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.capture_count, 3);
    assert_eq!(stats.solve_count, 3);
    assert_eq!(stats.successful_solves, 3);
    assert_eq!(stats.state, CycleState::Idle);
    assert!(!stats.running);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let saved = files_in(&dir.path().join("captures"));
    assert_eq!(saved.len(), 3);
    assert!(saved.iter().all(|p| p.extension().is_some_and(|e| e == "fits")));
    for path in solved.lock().unwrap().iter() {
        assert!(saved.contains(path));
    }

    for report in recorder.reports.lock().unwrap().iter() {
        assert!(report.timings.capture > Duration::ZERO);
        assert!(report.timings.save > Duration::ZERO);
        assert!(report.timings.solve > Duration::ZERO);
    }

    assert_eq!(recorder.starts.lock().unwrap().len(), 3);
    assert_eq!(recorder.captures.lock().unwrap().len(), 3);
    assert_eq!(recorder.solves.lock().unwrap().len(), 3);
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert_eq!(orch.last_solve(), Some(solve_result(83.8, -5.4)));
    assert!(orch.latest_frame().is_some());
    assert!(orch.stop().is_success());
}

#[test]
fn test_display_copy_written_when_enabled() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.capture.save_frames = true;
    let mut orch = orchestrator(config, camera(), None, None).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));

    let mut exts: Vec<String> = files_in(&dir.path().join("captures"))
        .iter()
        .filter_map(|p| p.extension().map(|e| e.to_string_lossy().into_owned()))
        .collect();
    exts.sort();
    assert_eq!(exts, vec!["fits", "png"]);
}

#[test]
fn test_pre_gate_skip_writes_nothing_and_solves_nothing() {
    let dir = tempdir().unwrap();
    let solver = MockSolver::solving(solve_result(0.0, 0.0));
    let calls = solver.calls.clone();
    let mount = SimulatedMount::new(10.0, 10.0).with_default_slewing(true);
    let mut orch = orchestrator(fast_config(dir.path()), camera(), Some(mount), Some(solver))
        .with_max_cycles(3);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let stats = orch.stats();
    assert_eq!(stats.skipped_cycles, 3);
    assert_eq!(stats.capture_count, 0);
    assert_eq!(stats.solve_count, 0);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(files_in(&dir.path().join("captures")).is_empty());
    assert!(recorder.captures.lock().unwrap().is_empty());
    assert!(recorder
        .reports
        .lock()
        .unwrap()
        .iter()
        .all(|r| r.outcome == CycleOutcome::Skipped(GateReason::Slewing)));
    assert_eq!(orch.status().level, StatusLevel::Success);
}

#[test]
fn test_post_gate_discard_removes_files() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.capture.save_frames = true;
    let solver = MockSolver::solving(solve_result(0.0, 0.0));
    let calls = solver.calls.clone();
    // Still before the exposure, slewing right after it.
    let mount = SimulatedMount::new(10.0, 10.0).with_slewing_script([false, true]);
    let mut orch = orchestrator(config, camera(), Some(mount), Some(solver)).with_max_cycles(1);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let captures = recorder.captures.lock().unwrap();
    assert_eq!(captures.len(), 1);
    let written: Vec<_> = captures[0].paths().cloned().collect();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|p| !p.exists()));
    assert!(files_in(&dir.path().join("captures")).is_empty());

    let stats = orch.stats();
    assert_eq!(stats.discarded_cycles, 1);
    assert_eq!(stats.solve_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        stats.last_discard_reason.as_deref(),
        Some("mount slewed during exposure")
    );
}

#[test]
fn test_wait_policy_captures_after_slew_ends() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.gating.policy = SlewPolicy::Wait;
    config.gating.check_interval_secs = 0.01;
    let mount = SimulatedMount::new(10.0, 10.0).with_slewing_script([true, true, false]);
    let mut orch = orchestrator(config, camera(), Some(mount), None).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));

    let stats = orch.stats();
    assert_eq!(stats.capture_count, 1);
    assert_eq!(stats.skipped_cycles, 0);
}

#[test]
fn test_wait_policy_times_out() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.gating.policy = SlewPolicy::Wait;
    config.gating.check_interval_secs = 0.01;
    config.gating.wait_timeout_secs = 0.05;
    let mount = SimulatedMount::new(10.0, 10.0).with_default_slewing(true);
    let mut orch = orchestrator(config, camera(), Some(mount), None).with_max_cycles(1);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    assert_eq!(orch.stats().capture_count, 0);
    let reports = recorder.reports.lock().unwrap();
    assert!(matches!(
        reports[0].outcome,
        CycleOutcome::Skipped(GateReason::SlewWaitTimeout(_))
    ));
}

#[test]
fn test_not_tracking_skips_when_required() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.gating.require_tracking = true;
    let mount = SimulatedMount::new(10.0, 10.0).with_tracking(Some(false));
    let mut orch = orchestrator(config.clone(), camera(), Some(mount), None).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));
    assert_eq!(orch.stats().skipped_cycles, 1);

    // A mount that cannot report tracking is not held back.
    let mount = SimulatedMount::new(10.0, 10.0).with_tracking(None);
    let mut orch = orchestrator(config, camera(), Some(mount), None).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));
    assert_eq!(orch.stats().capture_count, 1);
}

#[test]
fn test_cycle_starts_respect_interval() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    let interval = Duration::from_millis(200);
    config.capture.interval_secs = interval.as_secs_f64();
    let mut orch = orchestrator(config, camera(), None, None).with_max_cycles(5);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let starts = recorder.starts.lock().unwrap();
    assert_eq!(starts.len(), 5);
    for pair in starts.windows(2) {
        let delta = pair[1].1.duration_since(pair[0].1);
        assert!(delta >= interval, "cycle {} started after {delta:?}", pair[1].0);
    }
}

#[test]
fn test_retry_budget_exhaustion_is_critical() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.retry.max_consecutive_failures = 3;
    let mut orch = orchestrator(config, camera().with_failures(100), None, None);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let status = orch.status();
    assert_eq!(status.level, StatusLevel::Critical);
    let stats = status.data.unwrap();
    assert_eq!(stats.failed_cycles, 3);
    assert_eq!(stats.consecutive_failures, 3);
    assert!(stats.last_error.is_some());
    assert_eq!(recorder.errors.lock().unwrap().len(), 3);
    assert!(!orch.is_running());
}

#[test]
fn test_success_resets_consecutive_failures() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.retry.max_consecutive_failures = 2;
    let mut orch = orchestrator(config, camera().with_failures(1), None, None).with_max_cycles(3);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));

    let stats = orch.stats();
    assert_eq!(stats.failed_cycles, 1);
    assert_eq!(stats.capture_count, 2);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(orch.status().level, StatusLevel::Success);
}

#[test]
fn test_solver_errors_do_not_stop_capture() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.retry.max_consecutive_failures = 1;
    let solver = MockSolver::failing(SolveError::Process("exited with 1".into()));
    let mut orch = orchestrator(config, camera(), None, Some(solver)).with_max_cycles(3);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let stats = orch.stats();
    assert_eq!(stats.capture_count, 3);
    assert_eq!(stats.solve_count, 3);
    assert_eq!(stats.successful_solves, 0);
    assert_eq!(stats.failed_cycles, 0);
    assert!(stats.last_error.unwrap().contains("exited with 1"));
    assert_eq!(recorder.errors.lock().unwrap().len(), 3);
    assert!(recorder
        .reports
        .lock()
        .unwrap()
        .iter()
        .all(|r| matches!(r.outcome, CycleOutcome::Completed(SolveOutcome::Failed(_)))));
}

#[test]
fn test_no_solution_is_benign() {
    let dir = tempdir().unwrap();
    let solver = MockSolver::failing(SolveError::NoSolution("3 stars".into()));
    let mut orch =
        orchestrator(fast_config(dir.path()), camera(), None, Some(solver)).with_max_cycles(2);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    assert!(recorder.errors.lock().unwrap().is_empty());
    assert!(orch.stats().last_error.is_none());
    assert!(recorder
        .reports
        .lock()
        .unwrap()
        .iter()
        .all(|r| matches!(r.outcome, CycleOutcome::Completed(SolveOutcome::NoSolution(_)))));
}

#[test]
fn test_solve_rate_limited() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.solver.min_solve_interval_secs = 3600.0;
    let solver = MockSolver::solving(solve_result(1.0, 2.0));
    let calls = solver.calls.clone();
    let mut orch = orchestrator(config, camera(), None, Some(solver)).with_max_cycles(3);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let reports = recorder.reports.lock().unwrap();
    assert!(matches!(reports[0].outcome, CycleOutcome::Completed(SolveOutcome::Solved(_))));
    assert_eq!(reports[1].outcome, CycleOutcome::Completed(SolveOutcome::NotDue));
    assert_eq!(reports[2].outcome, CycleOutcome::Completed(SolveOutcome::NotDue));
}

#[test]
fn test_solver_disabled_in_config() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.solver.enabled = false;
    let solver = MockSolver::solving(solve_result(1.0, 2.0));
    let calls = solver.calls.clone();
    let mut orch = orchestrator(config, camera(), None, Some(solver)).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(orch.stats().solve_count, 0);
}

#[test]
fn test_moon_at_centre_skips_solve_and_caps_exposure() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.bright_body.enabled = true;
    config.bright_body.bodies = vec![BrightBody::Moon];
    config.bright_body.max_exposure_secs = 0.005;
    let (ra, dec) = body_position(BrightBody::Moon, Utc::now());
    let solver = MockSolver::solving(solve_result(ra, dec));
    let calls = solver.calls.clone();
    let mount = SimulatedMount::new(ra, dec);
    let mut orch = orchestrator(config, camera(), Some(mount), Some(solver)).with_max_cycles(2);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let reports = recorder.reports.lock().unwrap();
    assert!(reports.iter().all(|r| r.outcome
        == CycleOutcome::Completed(SolveOutcome::BrightBodySkip(BrightBody::Moon))));
    assert_eq!(orch.exposure_cap(), Some(0.005));
}

#[test]
fn test_moon_in_field_falls_back_to_last_good_solve() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.bright_body.enabled = true;
    config.bright_body.bodies = vec![BrightBody::Moon];
    config.bright_body.max_exposure_secs = 0.005;
    config.bright_body.override_window_secs = 600.0;
    config.bright_body.last_good_max_age_secs = 600.0;
    // Roughly 3.5 x 2.6 degrees; dead-centre radius about 0.52 degrees.
    config.optics.focal_length_mm = 100.0;
    let (ra, dec) = body_position(BrightBody::Moon, Utc::now());
    let center = (ra, dec + 0.9);
    let first = solve_result(center.0, center.1);
    let solver = MockSolver::scripted(vec![
        Ok(first.clone()),
        Err(SolveError::Process("washed out".into())),
    ]);
    let calls = solver.calls.clone();
    let mount = SimulatedMount::new(center.0, center.1);
    let mut orch = orchestrator(config, camera(), Some(mount), Some(solver)).with_max_cycles(2);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let reports = recorder.reports.lock().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].outcome, CycleOutcome::Completed(SolveOutcome::Solved(first.clone())));
    assert_eq!(reports[1].outcome, CycleOutcome::Completed(SolveOutcome::LastGood(first.clone())));
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert_eq!(recorder.solves.lock().unwrap().len(), 2);
    assert_eq!(orch.exposure_cap(), Some(0.005));
    assert_eq!(orch.stats().successful_solves, 1);
}

#[test]
fn test_calibration_applied_to_captures() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let mut dark_settings = settings(config.capture.exposure_time);
    dark_settings.gain = None;
    write_frame(
        &config
            .calibration
            .master_dir
            .join(master_dark_name(config.capture.exposure_time, "20250101_000000")),
        uniform(24, 32, 100.0),
        FrameType::MasterDark,
        &dark_settings,
    );
    let mut orch = orchestrator(config, camera(), None, None).with_max_cycles(1);
    let recorder = Arc::new(Recorder::default());
    run_to_end(&mut orch, &recorder);

    let reports = recorder.reports.lock().unwrap();
    let details = reports[0].calibration.as_ref().unwrap();
    assert!(details.dark_applied);
    let frame = orch.latest_frame().unwrap();
    assert!(frame.metadata.calibration.dark_applied);
}

#[test]
fn test_reload_references() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let master_dir = config.calibration.master_dir.clone();
    let orch = orchestrator(config, camera(), None, None);

    let empty = orch.reload_references();
    assert!(empty.is_success());
    assert_eq!(empty.data.unwrap().darks.len(), 0);

    write_frame(
        &master_dir.join(master_dark_name(1.0, "20250101_000000")),
        uniform(24, 32, 5.0),
        FrameType::MasterDark,
        &settings(1.0),
    );
    let loaded = orch.reload_references();
    assert_eq!(loaded.detail("master_darks_loaded"), Some("1"));
}

#[test]
fn test_start_twice_warns_and_stop_interrupts_wait() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.capture.interval_secs = 3600.0;
    let mut orch = orchestrator(config, camera(), None, None);
    let recorder = Arc::new(Recorder::default());
    orch.set_observers(vec![recorder.clone() as Arc<dyn CycleObserver>]);

    assert!(orch.start().is_success());
    assert_eq!(orch.start().level, StatusLevel::Warning);

    let deadline = Instant::now() + WAIT;
    while recorder.reports.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(orch.is_running());

    let asked = Instant::now();
    let stopped = orch.stop();
    assert!(stopped.is_success(), "{}", stopped.message);
    assert!(asked.elapsed() < Duration::from_secs(2));
    assert!(!orch.is_running());
    assert_eq!(orch.stats().cycles, 1);
    assert!(orch.disconnect().is_success());
}

#[test]
fn test_drop_stops_worker() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.capture.interval_secs = 3600.0;
    let mut orch = orchestrator(config, camera(), None, None);
    assert!(orch.start().is_success());
    let asked = Instant::now();
    drop(orch);
    assert!(asked.elapsed() < Duration::from_secs(6));
}

#[test]
fn test_cooling_started_with_capture() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.cooling.enabled = true;
    config.cooling.wait_for_cooling = false;
    config.cooling.warmup_on_stop = false;
    let mut orch = orchestrator(config, camera().with_cooler(20.0), None, None).with_max_cycles(1);
    run_to_end(&mut orch, &Arc::new(Recorder::default()));

    let cooling = orch.cooling().unwrap().cooling_status();
    assert!(cooling.is_cooling);
    assert_eq!(cooling.target_temperature, Some(-10.0));
}
