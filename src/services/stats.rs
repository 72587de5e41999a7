//! Small numeric helpers shared by the metrics, window and detection stages.
//!
//! Variances are sample variances (one degree of freedom removed). Statistics
//! that are undefined for the given input return `None` instead of NaN.

/// Absolute tolerance used by [`is_close`].
const ABS_TOLERANCE: f64 = 1e-8;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance, undefined below two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}

pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Differences between consecutive values.
pub fn consecutive_diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Rolling mean and sample variance over `window` trailing values.
///
/// Positions before the first full window have no value.
pub fn rolling_mean_var(values: &[f64], window: usize) -> Vec<(Option<f64>, Option<f64>)> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return (None, None);
            }
            let slice = &values[i + 1 - window..=i];
            (mean(slice), sample_variance(slice))
        })
        .collect()
}

/// Length of the longest run of `true` values.
pub fn max_consecutive_true(mask: &[bool]) -> usize {
    let mut best = 0;
    let mut current = 0;
    for &hit in mask {
        if hit {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// `|a - b| <= 1e-8 + rtol * |b|`, false when either side is not finite.
pub fn is_close(a: f64, b: f64, rtol: f64) -> bool {
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    (a - b).abs() <= ABS_TOLERANCE + rtol * b.abs()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Min-max scaling; a constant column scales to zero.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (Some(lo), Some(hi)) = (min(values), max(values)) else {
        return Vec::new();
    };
    let range = hi - lo;
    values
        .iter()
        .map(|v| if range > 0.0 { (v - lo) / range } else { 0.0 })
        .collect()
}
