use ndarray::{Array2, Zip};

use super::welford::RunningStats;
use super::{parallel, FrameReader, ZeroInclusionPolicy};
use crate::error::Result;
use crate::progress::{ProgressReporter, ProgressStage};

/// Two-pass streaming sigma clip.
///
/// Pass 1 accumulates the per-pixel mean and population standard deviation.
/// Pass 2 re-reads every frame and averages only values with
/// `|v - mean| <= sigma * std`. Returns the combined array and the number of
/// pixels where nothing survived.
pub(crate) fn sigma_clip(
    reader: &mut FrameReader<'_>,
    sigma: f32,
    zero_inclusion: ZeroInclusionPolicy,
    reporter: &dyn ProgressReporter,
) -> Result<(Array2<f32>, usize)> {
    let n = reader.len();

    reporter.begin_stage(ProgressStage::Statistics, Some(n));
    let mut stats: Option<RunningStats> = None;
    for i in 0..n {
        if let Some(frame) = reader.load(i) {
            stats
                .get_or_insert_with(|| RunningStats::new(frame.dim()))
                .push(frame.view());
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let stats = stats.ok_or_else(|| reader.no_readable_frames())?;
    let (mean, std) = stats.finish();
    let shape = mean.dim();
    let par = parallel(shape);
    let sigma = sigma as f64;

    reporter.begin_stage(ProgressStage::Rejection, Some(n));
    let mut sum = Array2::<f64>::zeros(shape);
    let mut count = Array2::<u32>::zeros(shape);
    for i in 0..n {
        if let Some(frame) = reader.load(i) {
            let accept = |s: &mut f64, c: &mut u32, &v: &f32, &m: &f64, &sd: &f64| {
                let v = v as f64;
                if (v - m).abs() <= sigma * sd {
                    *s += v;
                    *c += 1;
                }
            };
            let zip = Zip::from(&mut sum)
                .and(&mut count)
                .and(&frame)
                .and(&mean)
                .and(&std);
            if par {
                zip.par_for_each(accept);
            } else {
                zip.for_each(accept);
            }
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let empty = count.iter().filter(|&&c| c == 0).count();
    let mut out = Array2::<f32>::zeros(shape);
    Zip::from(&mut out)
        .and(&sum)
        .and(&count)
        .and(&mean)
        .for_each(|o, &s, &c, &m| {
            *o = match (c, zero_inclusion) {
                (0, ZeroInclusionPolicy::PassOneMean) => m as f32,
                _ => (s / c.max(1) as f64) as f32,
            };
        });

    Ok((out, empty))
}
