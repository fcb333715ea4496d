//! Streaming frame combination.
//!
//! Every method reads its frames one at a time from a [`FrameSource`], so
//! working memory is a handful of frame-sized accumulators regardless of how
//! many frames are combined.

pub mod mean;
pub mod minmax;
pub mod normalize;
pub mod sigma_clip;
pub mod source;
pub mod welford;

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::DEFAULT_SIGMA_THRESHOLD;
use crate::error::{Result, StellacapError};
use crate::progress::{NoOpReporter, ProgressReporter};

pub use source::{DarkSubtractedSource, FitsFrameSource, FrameSource};

/// Outlier rejection used when combining a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionMethod {
    /// Reject pixels further than `sigma` standard deviations from the mean.
    #[default]
    SigmaClip,
    /// Drop the single lowest and highest value of every pixel.
    #[serde(rename = "minmax")]
    MinMax,
    Mean,
}

impl std::fmt::Display for RejectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigmaClip => write!(f, "sigma_clip"),
            Self::MinMax => write!(f, "minmax"),
            Self::Mean => write!(f, "mean"),
        }
    }
}

impl std::str::FromStr for RejectionMethod {
    type Err = StellacapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sigma_clip" | "sigma" => Ok(Self::SigmaClip),
            "minmax" | "min_max" => Ok(Self::MinMax),
            "mean" => Ok(Self::Mean),
            other => Err(StellacapError::Config(format!(
                "unknown rejection method '{other}'"
            ))),
        }
    }
}

/// What a sigma-clipped pixel becomes when every frame was rejected there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroInclusionPolicy {
    /// Divide the empty sum by one, giving zero.
    #[default]
    Zero,
    /// Use the unclipped first-pass mean.
    PassOneMean,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CombineParams {
    pub method: RejectionMethod,
    pub sigma: f32,
    pub zero_inclusion: ZeroInclusionPolicy,
}

impl Default for CombineParams {
    fn default() -> Self {
        Self {
            method: RejectionMethod::SigmaClip,
            sigma: DEFAULT_SIGMA_THRESHOLD,
            zero_inclusion: ZeroInclusionPolicy::Zero,
        }
    }
}

impl CombineParams {
    pub fn new(method: RejectionMethod, sigma: f32) -> Self {
        Self {
            method,
            sigma,
            ..Default::default()
        }
    }
}

/// Result of combining a batch.
#[derive(Clone, Debug)]
pub struct Combined {
    pub data: Array2<f32>,
    pub frames_used: usize,
    /// Frames that could not be read or did not match the batch shape.
    pub skipped: usize,
    /// Sigma-clip pixels where every frame was rejected.
    pub zero_inclusion_pixels: usize,
}

/// Combine FITS frames from disk.
pub fn combine(paths: &[PathBuf], method: RejectionMethod, sigma: f32) -> Result<Combined> {
    let source = FitsFrameSource::new(paths.to_vec());
    combine_source(&source, &CombineParams::new(method, sigma), &NoOpReporter)
}

/// Combine FITS frames from disk, subtracting `dark` from each as it is read.
pub fn combine_with_dark(
    paths: &[PathBuf],
    dark: Array2<f32>,
    method: RejectionMethod,
    sigma: f32,
) -> Result<Combined> {
    let source = DarkSubtractedSource::new(FitsFrameSource::new(paths.to_vec()), dark);
    combine_source(&source, &CombineParams::new(method, sigma), &NoOpReporter)
}

/// Combine any frame source with the given parameters.
pub fn combine_source(
    source: &dyn FrameSource,
    params: &CombineParams,
    reporter: &dyn ProgressReporter,
) -> Result<Combined> {
    if source.is_empty() {
        return Err(StellacapError::EmptySequence);
    }

    let mut reader = FrameReader::new(source);
    let (data, zero_inclusion_pixels) = match params.method {
        RejectionMethod::SigmaClip => {
            sigma_clip::sigma_clip(&mut reader, params.sigma, params.zero_inclusion, reporter)?
        }
        RejectionMethod::MinMax => (minmax::minmax(&mut reader, reporter)?, 0),
        RejectionMethod::Mean => (mean::mean(&mut reader, reporter)?, 0),
    };

    let frames_used = reader.frames_used();
    let skipped = source.len() - frames_used;
    if zero_inclusion_pixels > 0 {
        warn!(
            pixels = zero_inclusion_pixels,
            policy = ?params.zero_inclusion,
            "Sigma clip rejected every frame at some pixels"
        );
    }
    info!(
        method = %params.method,
        frames_used,
        skipped,
        "Combined frame batch"
    );

    Ok(Combined {
        data,
        frames_used,
        skipped,
        zero_inclusion_pixels,
    })
}

/// Loads frames from a source for one multi-pass combination, enforcing a
/// single shape. A frame that fails once is excluded from later passes.
pub(crate) struct FrameReader<'a> {
    source: &'a dyn FrameSource,
    shape: Option<(usize, usize)>,
    readable: Vec<bool>,
}

impl<'a> FrameReader<'a> {
    pub(crate) fn new(source: &'a dyn FrameSource) -> Self {
        Self {
            source,
            shape: None,
            readable: vec![true; source.len()],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.readable.len()
    }

    pub(crate) fn load(&mut self, index: usize) -> Option<Array2<f32>> {
        if !self.readable[index] {
            return None;
        }
        match self.source.load(index) {
            Ok(frame) => match self.shape {
                None => {
                    self.shape = Some(frame.dim());
                    Some(frame)
                }
                Some(shape) if shape == frame.dim() => Some(frame),
                Some(shape) => {
                    warn!(
                        frame = %self.source.label(index),
                        expected = ?shape,
                        actual = ?frame.dim(),
                        "Skipping frame with mismatched shape"
                    );
                    self.readable[index] = false;
                    None
                }
            },
            Err(e) => {
                warn!(frame = %self.source.label(index), error = %e, "Skipping unreadable frame");
                self.readable[index] = false;
                None
            }
        }
    }

    pub(crate) fn frames_used(&self) -> usize {
        self.readable.iter().filter(|&&ok| ok).count()
    }

    pub(crate) fn no_readable_frames(&self) -> StellacapError {
        StellacapError::NoReadableFrames {
            attempted: self.len(),
        }
    }
}

/// True when a frame of this shape is large enough for Rayon.
pub(crate) fn parallel(shape: (usize, usize)) -> bool {
    shape.0 * shape.1 >= crate::consts::PARALLEL_PIXEL_THRESHOLD
}
