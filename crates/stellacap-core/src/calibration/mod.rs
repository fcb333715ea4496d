//! Master frame building, lookup and application.

pub mod applier;
pub mod masters;
pub mod matcher;
pub mod store;

pub use applier::{CalibrationApplier, CalibrationDetails, CalibrationOutcome};
pub use masters::{MasterFrameBuilder, MasterSummary};
pub use matcher::{DarkFallbackPolicy, MatchPolicy};
pub use store::{ReferenceEntry, ReferenceStore, SettingTags};
