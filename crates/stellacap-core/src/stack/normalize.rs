use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Statistic a master flat is divided by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    #[default]
    Mean,
    Median,
    Max,
}

impl std::fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Median => write!(f, "median"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Scalar the data would be divided by under `method`.
pub fn normalization_factor(data: &Array2<f32>, method: NormalizationMethod) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    match method {
        NormalizationMethod::Mean => {
            (data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64) as f32
        }
        NormalizationMethod::Median => {
            let mut values: Vec<f32> = data.iter().copied().collect();
            let mid = values.len() / 2;
            let (_, &mut upper, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
            if values.len() % 2 == 1 {
                upper
            } else {
                let lower = values[..mid]
                    .iter()
                    .copied()
                    .fold(f32::NEG_INFINITY, f32::max);
                (lower + upper) * 0.5
            }
        }
        NormalizationMethod::Max => data.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    }
}

/// Divide `data` in place by its normalization factor and return the factor.
/// Leaves the data untouched when the factor is not positive.
pub fn normalize(data: &mut Array2<f32>, method: NormalizationMethod) -> f32 {
    let factor = normalization_factor(data, method);
    if factor > 0.0 {
        data.mapv_inplace(|v| v / factor);
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_even_count() {
        let a = array![[1.0f32, 4.0], [2.0, 10.0]];
        assert!((normalization_factor(&a, NormalizationMethod::Median) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_factor_is_noop() {
        let mut a = array![[-1.0f32, -2.0], [-3.0, -4.0]];
        let before = a.clone();
        normalize(&mut a, NormalizationMethod::Max);
        assert_eq!(a, before);
    }
}
