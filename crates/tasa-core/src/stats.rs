//! Online statistics shared by the learning components.
//!
//! Two averaging rules coexist: regional market knowledge uses an
//! arithmetic running mean weighted by the number of data points seen, while
//! comparable-selection and prompt learning use a constant-factor
//! exponential moving average. Both live here so the choice is explicit at
//! every call site.

use serde::{Deserialize, Serialize};

/// Critical chi-square value for one degree of freedom at p < 0.05.
pub const CHI_SQUARE_CRITICAL_P05: f64 = 3.84;

/// Arithmetic running mean: `(current * count + value) / (count + 1)`.
///
/// `count` is the number of observations already folded into `current`.
pub fn running_mean(current: f64, count: u32, value: f64) -> f64 {
  let n = f64::from(count);
  (current * n + value) / (n + 1.0)
}

/// Exponential moving average with smoothing factor `alpha` ∈ (0, 1].
pub fn ema(current: f64, value: f64, alpha: f64) -> f64 {
  current + alpha * (value - current)
}

/// Clamp a confidence score to `[0, 100]`. NaN maps to zero.
pub fn clamp_confidence(value: f64) -> f64 {
  if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}

/// Clamp a weight or ratio to `[0, 1]`. NaN maps to zero.
pub fn clamp_unit(value: f64) -> f64 {
  if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    None
  } else {
    Some(values.iter().sum::<f64>() / values.len() as f64)
  }
}

/// Trailing moving average over `window` items. The first `window - 1`
/// points average over what is available so far.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
  let window = window.max(1);
  (0..values.len())
    .map(|i| {
      let start = (i + 1).saturating_sub(window);
      let slice = &values[start..=i];
      slice.iter().sum::<f64>() / slice.len() as f64
    })
    .collect()
}

/// Pearson chi-square statistic for a 2×2 success/failure table.
///
/// Returns zero when any marginal total is zero.
pub fn chi_square_2x2(
  a_success: u32,
  a_failure: u32,
  b_success: u32,
  b_failure: u32,
) -> f64 {
  let (a, b, c, d) = (
    f64::from(a_success),
    f64::from(a_failure),
    f64::from(b_success),
    f64::from(b_failure),
  );
  let n = a + b + c + d;
  let denom = (a + b) * (c + d) * (a + c) * (b + d);
  if denom == 0.0 {
    return 0.0;
  }
  n * (a * d - b * c).powi(2) / denom
}

// ─── RunningStats ────────────────────────────────────────────────────────────

/// Welford accumulator: running mean and population variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
  pub count: u32,
  pub mean:  f64,
  /// Sum of squared deviations from the mean.
  pub m2:    f64,
}

impl RunningStats {
  pub fn push(&mut self, value: f64) {
    let previous = self.mean;
    self.mean = running_mean(self.mean, self.count, value);
    self.count += 1;
    self.m2 += (value - previous) * (value - self.mean);
  }

  pub fn variance(&self) -> f64 {
    if self.count < 2 { 0.0 } else { self.m2 / f64::from(self.count) }
  }

  pub fn std_dev(&self) -> f64 { self.variance().sqrt() }

  /// Standard deviation as a percentage of the mean.
  pub fn coefficient_of_variation(&self) -> f64 {
    if self.mean.abs() < f64::EPSILON {
      0.0
    } else {
      self.std_dev() / self.mean.abs() * 100.0
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn running_mean_first_value_is_value() {
    assert_eq!(running_mean(0.0, 0, 3000.0), 3000.0);
    assert_eq!(running_mean(3000.0, 1, 1000.0), 2000.0);
  }

  #[test]
  fn running_mean_converges_to_repeated_value() {
    let mut avg = 1200.0;
    let mut n = 4;
    for _ in 0..20_000 {
      avg = running_mean(avg, n, 3000.0);
      n += 1;
    }
    assert!((avg - 3000.0).abs() < 1.0, "avg = {avg}");
  }

  #[test]
  fn ema_converges_to_repeated_value() {
    let mut v = 0.0;
    for _ in 0..200 {
      v = ema(v, 100.0, 0.1);
    }
    assert!((v - 100.0).abs() < 1e-6);
  }

  #[test]
  fn confidence_is_clamped() {
    assert_eq!(clamp_confidence(250.0), 100.0);
    assert_eq!(clamp_confidence(-4.0), 0.0);
    assert_eq!(clamp_confidence(f64::NAN), 0.0);
    assert_eq!(clamp_confidence(f64::INFINITY), 100.0);
    assert_eq!(clamp_unit(1.7), 1.0);
  }

  #[test]
  fn moving_average_window() {
    let ma = moving_average(&[10.0, 20.0, 30.0, 40.0], 2);
    assert_eq!(ma, vec![10.0, 15.0, 25.0, 35.0]);
  }

  #[test]
  fn chi_square_known_table() {
    // 40/60 vs 60/40 successes out of 100 each.
    let chi = chi_square_2x2(40, 60, 60, 40);
    assert!((chi - 8.0).abs() < 1e-9);
    assert_eq!(chi_square_2x2(0, 0, 5, 5), 0.0);
  }

  #[test]
  fn running_stats_variance() {
    let mut s = RunningStats::default();
    for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
      s.push(v);
    }
    assert!((s.mean - 5.0).abs() < 1e-9);
    assert!((s.std_dev() - 2.0).abs() < 1e-9);
    assert!((s.coefficient_of_variation() - 40.0).abs() < 1e-9);
  }
}
