#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ndarray::Array2;

use stellacap_core::config::AppConfig;
use stellacap_core::error::SolveError;
use stellacap_core::frame::{AcquisitionSettings, Frame, FrameMetadata, FrameType, ImageData};
use stellacap_core::io::fits::{write_fits, FitsHeader};
use stellacap_core::io::header::header_from_metadata;
use stellacap_core::orchestrator::{CycleObserver, CycleReport, SavedFrame};
use stellacap_core::solve::{PlateSolveResult, PlateSolver, SolveHint};

/// Settings shared by most synthetic frames.
pub fn settings(exposure: f64) -> AcquisitionSettings {
    AcquisitionSettings {
        exposure_time: exposure,
        gain: Some(100.0),
        offset: Some(10),
        readout_mode: Some(0),
        binning: Some(1),
    }
}

/// Write a single-plane FITS frame carrying `settings` in its header.
pub fn write_frame(
    path: &Path,
    data: Array2<f32>,
    frame_type: FrameType,
    settings: &AcquisitionSettings,
) -> PathBuf {
    let meta = FrameMetadata {
        frame_type,
        settings: settings.clone(),
        ..Default::default()
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    write_fits(path, &ImageData::Mono(data), &header_from_metadata(&meta)).unwrap();
    path.to_path_buf()
}

/// Write a bare FITS frame with no acquisition cards.
pub fn write_plain(path: &Path, data: Array2<f32>) -> PathBuf {
    write_fits(path, &ImageData::Mono(data), &FitsHeader::new()).unwrap();
    path.to_path_buf()
}

/// A header-only FITS whose axes multiply past `usize`, as a corrupted
/// header can claim.
pub fn write_oversized_header(path: &Path) -> PathBuf {
    let cards = [
        "SIMPLE  =                    T",
        "BITPIX  =                  -32",
        "NAXIS   =                    2",
        "NAXIS1  =           4294967296",
        "NAXIS2  =           4294967296",
        "END",
    ];
    let mut bytes: Vec<u8> = cards.iter().flat_map(|c| format!("{c:<80}").into_bytes()).collect();
    bytes.resize(2880, b' ');
    std::fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

pub fn uniform(h: usize, w: usize, value: f32) -> Array2<f32> {
    Array2::from_elem((h, w), value)
}

pub fn light_frame(data: Array2<f32>, exposure: f64) -> Frame {
    Frame::mono(data, FrameMetadata::light(settings(exposure)))
}

pub fn solve_result(ra: f64, dec: f64) -> PlateSolveResult {
    PlateSolveResult {
        ra_center: ra,
        dec_center: dec,
        fov_width: 0.35,
        fov_height: 0.26,
        position_angle: 12.0,
        image_size: Some((64, 48)),
        confidence: 0.99,
        is_flipped: false,
        solving_time: Duration::from_millis(5),
        method: "mock".into(),
        stars_detected: None,
        pixel_scale: Some(19.7),
    }
}

/// Solver that returns canned answers and counts its calls.
pub struct MockSolver {
    pub calls: Arc<AtomicUsize>,
    pub solved: Arc<Mutex<Vec<PathBuf>>>,
    /// Answers in call order; the last one repeats.
    answers: VecDeque<Result<PlateSolveResult, SolveError>>,
}

impl MockSolver {
    pub fn solving(result: PlateSolveResult) -> Self {
        Self::scripted(vec![Ok(result)])
    }

    pub fn failing(error: SolveError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn scripted(answers: Vec<Result<PlateSolveResult, SolveError>>) -> Self {
        assert!(!answers.is_empty());
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            solved: Arc::new(Mutex::new(Vec::new())),
            answers: answers.into(),
        }
    }
}

impl PlateSolver for MockSolver {
    fn name(&self) -> &str {
        "mock"
    }

    fn solve(&mut self, image: &Path, _hint: &SolveHint) -> Result<PlateSolveResult, SolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.solved.lock().unwrap().push(image.to_path_buf());
        if self.answers.len() > 1 {
            self.answers.pop_front().unwrap()
        } else {
            self.answers[0].clone()
        }
    }
}

/// Observer that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub starts: Mutex<Vec<(u64, Instant)>>,
    pub captures: Mutex<Vec<SavedFrame>>,
    pub solves: Mutex<Vec<PlateSolveResult>>,
    pub errors: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<CycleReport>>,
}

impl CycleObserver for Recorder {
    fn on_cycle_start(&self, cycle: u64, started: Instant) {
        self.starts.lock().unwrap().push((cycle, started));
    }

    fn on_capture(&self, _frame: &Frame, saved: &SavedFrame) {
        self.captures.lock().unwrap().push(saved.clone());
    }

    fn on_solve(&self, result: &PlateSolveResult) {
        self.solves.lock().unwrap().push(result.clone());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn on_cycle_end(&self, report: &CycleReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// Config for fast orchestrator runs writing under `dir`.
pub fn fast_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.capture.exposure_time = 0.01;
    config.capture.interval_secs = 0.0;
    config.capture.output_dir = dir.join("captures");
    config.capture.raw_dir = dir.join("captures/raw");
    config.capture.save_frames = false;
    config.capture.use_timestamps = false;
    config.capture.readout_grace_secs = 2.0;
    config.capture.image_ready_poll_ms = 2;
    config.calibration.master_dir = dir.join("masters");
    config.solver.min_solve_interval_secs = 0.0;
    config.bright_body.enabled = false;
    config.retry.cooldown_secs = 0.0;
    config.cooling.cache_path = dir.join("cooling.toml");
    config
}

/// Files directly inside `dir`, or none if it does not exist.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default()
}
