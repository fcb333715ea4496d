use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::calibration::CalibrationDetails;
use crate::frame::Frame;
use crate::solve::{BrightBody, PlateSolveResult};

/// Where the worker is in its cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    Waiting,
    PreGate,
    Capturing,
    Saving,
    PostGate,
    Solving,
    SkipSolve,
    Stopping,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::PreGate => "pre-gate",
            Self::Capturing => "capturing",
            Self::Saving => "saving",
            Self::PostGate => "post-gate",
            Self::Solving => "solving",
            Self::SkipSolve => "skip-solve",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Why a pointing-safety gate held a cycle back.
#[derive(Clone, Debug, PartialEq)]
pub enum GateReason {
    Slewing,
    SlewWaitTimeout(Duration),
    NotTracking,
    SlewedDuringExposure,
    Stopped,
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slewing => write!(f, "mount is slewing"),
            Self::SlewWaitTimeout(d) => write!(f, "mount still slewing after {:.1}s", d.as_secs_f64()),
            Self::NotTracking => write!(f, "mount is not tracking"),
            Self::SlewedDuringExposure => write!(f, "mount slewed during exposure"),
            Self::Stopped => write!(f, "stop requested"),
        }
    }
}

/// What became of the solve step of a cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    Disabled,
    /// The minimum interval since the last solve has not passed.
    NotDue,
    /// Nothing was saved that the solver could read.
    NoCandidate,
    BrightBodySkip(BrightBody),
    Solved(PlateSolveResult),
    /// The solve failed during a bright-body override; the last good
    /// result stands in.
    LastGood(PlateSolveResult),
    /// Benign failure (no stars, poor conditions).
    NoSolution(String),
    Failed(String),
}

impl std::fmt::Display for SolveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::NotDue => write!(f, "not due"),
            Self::NoCandidate => write!(f, "no saved frame"),
            Self::BrightBodySkip(body) => write!(f, "skipped ({body} at field centre)"),
            Self::Solved(r) => write!(f, "solved ({:.4}, {:+.4})", r.ra_center, r.dec_center),
            Self::LastGood(_) => write!(f, "failed, using last good solution"),
            Self::NoSolution(reason) => write!(f, "no solution ({reason})"),
            Self::Failed(message) => write!(f, "failed ({message})"),
        }
    }
}

/// How a cycle ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The pre-gate held the cycle back before any exposure.
    Skipped(GateReason),
    /// The frame was captured but removed by the post-gate.
    Discarded(GateReason),
    Completed(SolveOutcome),
    Failed(String),
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Files written for one capture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SavedFrame {
    pub display: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub raw: Option<PathBuf>,
}

impl SavedFrame {
    /// The archival FITS if written, else the display copy.
    pub fn solve_candidate(&self) -> Option<&PathBuf> {
        self.archive.as_ref().or(self.display.as_ref())
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.display, &self.archive, &self.raw].into_iter().flatten()
    }
}

/// Summary of one finished cycle, passed to observers.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub started: Instant,
    pub outcome: CycleOutcome,
    pub saved: SavedFrame,
    pub calibration: Option<CalibrationDetails>,
    pub timings: CycleTimings,
}

/// Wall time spent in each stage of a cycle. Stages not reached stay zero.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CycleTimings {
    pub capture: Duration,
    /// Calibration and writing files.
    pub save: Duration,
    pub solve: Duration,
}

/// Counters reported by `Orchestrator::status`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct OrchestratorStats {
    pub state: CycleState,
    pub running: bool,
    pub cycles: u64,
    pub capture_count: u64,
    pub solve_count: u64,
    pub successful_solves: u64,
    pub skipped_cycles: u64,
    pub discarded_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub last_discard_reason: Option<String>,
    pub last_error: Option<String>,
}

/// Receives cycle events. Called on the worker thread; keep handlers short.
pub trait CycleObserver: Send + Sync {
    fn on_cycle_start(&self, _cycle: u64, _started: Instant) {}

    fn on_capture(&self, _frame: &Frame, _saved: &SavedFrame) {}

    fn on_solve(&self, _result: &PlateSolveResult) {}

    fn on_error(&self, _message: &str) {}

    fn on_cycle_end(&self, _report: &CycleReport) {}
}
