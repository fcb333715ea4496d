use ndarray::{Array2, Zip};

use super::FrameReader;
use crate::error::Result;
use crate::progress::{ProgressReporter, ProgressStage};

/// Single-pass per-pixel arithmetic mean.
pub(crate) fn mean(reader: &mut FrameReader<'_>, reporter: &dyn ProgressReporter) -> Result<Array2<f32>> {
    let n = reader.len();

    reporter.begin_stage(ProgressStage::Statistics, Some(n));
    let mut sum: Option<Array2<f64>> = None;
    for i in 0..n {
        if let Some(frame) = reader.load(i) {
            let acc = sum.get_or_insert_with(|| Array2::zeros(frame.dim()));
            Zip::from(acc).and(&frame).for_each(|s, &v| *s += v as f64);
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let sum = sum.ok_or_else(|| reader.no_readable_frames())?;
    let count = reader.frames_used() as f64;
    Ok(sum.mapv(|s| (s / count) as f32))
}
