use ndarray::{Array2, ArrayView2, Zip};

/// Per-pixel running mean and variance (Welford's update), one frame at a
/// time, accumulated in f64.
pub struct RunningStats {
    count: usize,
    mean: Array2<f64>,
    m2: Array2<f64>,
    parallel: bool,
}

impl RunningStats {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            count: 0,
            mean: Array2::zeros(shape),
            m2: Array2::zeros(shape),
            parallel: super::parallel(shape),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn push(&mut self, frame: ArrayView2<'_, f32>) {
        self.count += 1;
        let n = self.count as f64;
        let update = |mean: &mut f64, m2: &mut f64, &x: &f32| {
            let x = x as f64;
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        };
        let zip = Zip::from(&mut self.mean).and(&mut self.m2).and(&frame);
        if self.parallel {
            zip.par_for_each(update);
        } else {
            zip.for_each(update);
        }
    }

    pub fn mean(&self) -> &Array2<f64> {
        &self.mean
    }

    /// Consume the accumulator, returning (mean, population std-dev).
    pub fn finish(self) -> (Array2<f64>, Array2<f64>) {
        let n = self.count.max(1) as f64;
        let mut std = self.m2;
        std.mapv_inplace(|m2| (m2 / n).max(0.0).sqrt());
        (self.mean, std)
    }
}
