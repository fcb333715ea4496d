use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StellacapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("None of the {attempted} input frames could be read")]
    NoReadableFrames { attempted: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Coarse error classes used when reporting failures to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Device,
    Calibration,
    Solving,
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Device => write!(f, "device"),
            Self::Calibration => write!(f, "calibration"),
            Self::Solving => write!(f, "solving"),
            Self::Io => write!(f, "io"),
        }
    }
}

impl StellacapError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::Device(_) => ErrorCategory::Device,
            Self::Calibration(_)
            | Self::ShapeMismatch { .. }
            | Self::EmptySequence
            | Self::NoReadableFrames { .. } => ErrorCategory::Calibration,
            Self::Solve(_) => ErrorCategory::Solving,
            Self::Io(_) | Self::Image(_) | Self::InvalidFits(_) | Self::Pipeline(_) => {
                ErrorCategory::Io
            }
        }
    }
}

/// Failures reported by camera, mount and cooler implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The device does not offer this capability at all.
    #[error("{0} is not supported by this device")]
    Unsupported(String),

    /// The capability exists but the call failed.
    #[error("device operation failed: {0}")]
    Failed(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("device is not connected")]
    NotConnected,
}

impl DeviceError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Failures of an external plate solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    /// The solver ran but found no solution (clouds, too few stars).
    #[error("no solution: {0}")]
    NoSolution(String),

    #[error("solver process failed: {0}")]
    Process(String),

    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("no result file found after {0:?}")]
    SidecarMissing(Duration),

    #[error("could not parse solver result: {0}")]
    Parse(String),

    #[error("solver I/O error: {0}")]
    Io(String),
}

impl SolveError {
    /// Benign failures are expected under poor sky conditions and do not
    /// count against the retry budget.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::NoSolution(_) => true,
            Self::Process(msg) | Self::Parse(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("no_stars") || lower.contains("poor_conditions")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StellacapError>;
