/// Long-running stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProgressStage {
    /// First pass over a batch (mean/variance or min/max).
    Statistics,
    /// Second pass over a batch (rejection and accumulation).
    Rejection,
    MasterBias,
    MasterDark(f64),
    MasterFlat(f64),
    Writing,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Statistics => write!(f, "Computing statistics"),
            Self::Rejection => write!(f, "Rejecting outliers"),
            Self::MasterBias => write!(f, "Master bias"),
            Self::MasterDark(exp) => write!(f, "Master dark {exp:.3}s"),
            Self::MasterFlat(exp) => write!(f, "Master flat {exp:.3}s"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Thread-safe progress reporting for batch work.
///
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started. `total_items` is the number of frames in it,
    /// if known.
    fn begin_stage(&self, _stage: ProgressStage, _total_items: Option<usize>) {}

    /// `items_done` frames of the current stage are finished.
    fn advance(&self, _items_done: usize) {}

    fn finish_stage(&self) {}
}

pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
