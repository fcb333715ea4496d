use std::path::PathBuf;

use ndarray::Array2;

use crate::error::{Result, StellacapError};
use crate::frame::ImageData;
use crate::io::fits::read_fits;

/// Ordered, re-readable collection of equally shaped frames.
///
/// Combination makes up to two passes, so `load` must return the same data
/// each time it is called with the same index.
pub trait FrameSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name of a frame, for logs.
    fn label(&self, index: usize) -> String;

    fn load(&self, index: usize) -> Result<Array2<f32>>;
}

/// Single-plane FITS files read from disk on demand.
pub struct FitsFrameSource {
    paths: Vec<PathBuf>,
}

impl FitsFrameSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl FrameSource for FitsFrameSource {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn label(&self, index: usize) -> String {
        self.paths[index].display().to_string()
    }

    fn load(&self, index: usize) -> Result<Array2<f32>> {
        match read_fits(&self.paths[index])?.data {
            ImageData::Mono(data) => Ok(data),
            ImageData::Planes(_) => Err(StellacapError::InvalidFits(format!(
                "{}: calibration frames must be single-plane",
                self.label(index)
            ))),
        }
    }
}

/// Wraps a source and subtracts a dark from every frame as it is read.
pub struct DarkSubtractedSource<S> {
    inner: S,
    dark: Array2<f32>,
}

impl<S: FrameSource> DarkSubtractedSource<S> {
    pub fn new(inner: S, dark: Array2<f32>) -> Self {
        Self { inner, dark }
    }
}

impl<S: FrameSource> FrameSource for DarkSubtractedSource<S> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn label(&self, index: usize) -> String {
        self.inner.label(index)
    }

    fn load(&self, index: usize) -> Result<Array2<f32>> {
        let mut frame = self.inner.load(index)?;
        if frame.dim() != self.dark.dim() {
            return Err(StellacapError::ShapeMismatch {
                expected: self.dark.dim(),
                actual: frame.dim(),
            });
        }
        frame -= &self.dark;
        Ok(frame)
    }
}

/// In-memory frames, mostly for tests and small batches.
impl FrameSource for Vec<Array2<f32>> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn label(&self, index: usize) -> String {
        format!("frame {index}")
    }

    fn load(&self, index: usize) -> Result<Array2<f32>> {
        Ok(self[index].clone())
    }
}
