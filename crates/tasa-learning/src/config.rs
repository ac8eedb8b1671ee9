//! Tunable thresholds of the learning layer.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Thresholds shared by the learning components. Every field has a default,
/// so a partial `[learning]` table in the settings file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
  /// Predictions younger than this are not validated.
  pub prediction_min_age_days:      u32,
  /// Ungraduated location knowledge unseen for this long is removed.
  pub location_decay_days:          u32,
  /// Minimum regional confidence (0–100) for a performance prediction.
  pub regional_confidence_floor:    f64,
  /// Learned comparable criteria are used above this confidence (0–100).
  pub comparable_confidence_floor:  f64,
  /// Uses per arm before an A/B test can be significant.
  pub ab_min_uses_per_arm:          u32,
  /// Minimum gap between analyses of one property before a level upgrade.
  pub deepening_min_interval_hours: u32,
}

impl Default for LearningConfig {
  fn default() -> Self {
    Self {
      prediction_min_age_days:      30,
      location_decay_days:          30,
      regional_confidence_floor:    30.0,
      comparable_confidence_floor:  50.0,
      ab_min_uses_per_arm:          30,
      deepening_min_interval_hours: 24,
    }
  }
}

impl LearningConfig {
  pub fn prediction_min_age(&self) -> Duration {
    Duration::days(i64::from(self.prediction_min_age_days))
  }

  pub fn location_decay_window(&self) -> Duration {
    Duration::days(i64::from(self.location_decay_days))
  }

  pub fn deepening_min_interval(&self) -> Duration {
    Duration::hours(i64::from(self.deepening_min_interval_hours))
  }
}
