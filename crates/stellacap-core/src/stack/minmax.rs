use ndarray::{Array2, Zip};

use super::{parallel, FrameReader};
use crate::error::Result;
use crate::progress::{ProgressReporter, ProgressStage};

/// Two-pass streaming min/max rejection.
///
/// Pass 1 finds the per-pixel minimum and maximum. Pass 2 drops the first
/// occurrence of each (so exactly two values per pixel are excluded) and
/// averages the rest. Batches of two frames or fewer are plainly averaged.
pub(crate) fn minmax(
    reader: &mut FrameReader<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<Array2<f32>> {
    let n = reader.len();

    reporter.begin_stage(ProgressStage::Statistics, Some(n));
    let mut bounds: Option<(Array2<f32>, Array2<f32>)> = None;
    for i in 0..n {
        if let Some(frame) = reader.load(i) {
            bounds = Some(match bounds.take() {
                None => (frame.clone(), frame),
                Some((mut lo, mut hi)) => {
                    Zip::from(&mut lo).and(&mut hi).and(&frame).for_each(|lo, hi, &v| {
                        *lo = lo.min(v);
                        *hi = hi.max(v);
                    });
                    (lo, hi)
                }
            });
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let (lo, hi) = bounds.ok_or_else(|| reader.no_readable_frames())?;
    let frames_read = reader.frames_used();
    let shape = lo.dim();

    reporter.begin_stage(ProgressStage::Rejection, Some(n));
    let mut sum = Array2::<f64>::zeros(shape);
    let out = if frames_read <= 2 {
        for i in 0..n {
            if let Some(frame) = reader.load(i) {
                Zip::from(&mut sum).and(&frame).for_each(|s, &v| *s += v as f64);
            }
            reporter.advance(i + 1);
        }
        let count = reader.frames_used().max(1) as f64;
        sum.mapv(|s| (s / count) as f32)
    } else {
        let mut used_min = Array2::<bool>::from_elem(shape, false);
        let mut used_max = Array2::<bool>::from_elem(shape, false);
        let par = parallel(shape);
        for i in 0..n {
            if let Some(frame) = reader.load(i) {
                let accumulate =
                    |s: &mut f64, umin: &mut bool, umax: &mut bool, &v: &f32, &l: &f32, &h: &f32| {
                        if !*umin && v == l {
                            *umin = true;
                        } else if !*umax && v == h {
                            *umax = true;
                        } else {
                            *s += v as f64;
                        }
                    };
                let zip = Zip::from(&mut sum)
                    .and(&mut used_min)
                    .and(&mut used_max)
                    .and(&frame)
                    .and(&lo)
                    .and(&hi);
                if par {
                    zip.par_for_each(accumulate);
                } else {
                    zip.for_each(accumulate);
                }
            }
            reporter.advance(i + 1);
        }
        // A frame that vanished between passes may leave a pixel's min or
        // max unconsumed.
        let frames = reader.frames_used();
        let mut out = Array2::<f32>::zeros(shape);
        Zip::from(&mut out)
            .and(&sum)
            .and(&used_min)
            .and(&used_max)
            .for_each(|o, &s, &umin, &umax| {
                let count = frames - umin as usize - umax as usize;
                *o = (s / count.max(1) as f64) as f32;
            });
        out
    };
    reporter.finish_stage();

    Ok(out)
}
