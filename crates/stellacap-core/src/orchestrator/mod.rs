//! The capture-and-solve loop: gate, expose, calibrate, save, solve.

pub mod bright;
pub mod gating;
pub mod persist;
pub mod types;
pub mod worker;

pub use bright::{BrightBodyGuard, SolveDecision};
pub use gating::MountGate;
pub use persist::FramePersister;
pub use types::{
    CycleObserver, CycleOutcome, CycleReport, CycleState, CycleTimings, GateReason,
    OrchestratorStats, SavedFrame, SolveOutcome,
};
pub use worker::{Devices, Orchestrator};
