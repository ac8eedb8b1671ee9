//! Comparable-selection intelligence per (region, property type).
//!
//! Defaults are resolved in exactly one place per entity kind:
//! [`SelectionCriteria::default_for`] and [`FeatureWeights::default_for`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  identity::normalize_name,
  report::PropertyType,
  stats::clamp_unit,
  store::{Collection, Record},
};

/// Attributes a comparable can be required or preferred to share with the
/// subject property.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchField {
  PropertyType,
  Bedrooms,
  Bathrooms,
  Condition,
  Features,
  Neighborhood,
}

// ─── Criteria ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
  pub max_distance_km:               f64,
  pub optimal_distance_km:           f64,
  /// Accepted comparable/subject area ratio band.
  pub area_ratio_min:                f64,
  pub area_ratio_max:                f64,
  pub required_matches:              Vec<MatchField>,
  pub preferred_matches:             Vec<MatchField>,
  pub max_comparable_age_days:       u32,
  pub preferred_comparable_age_days: u32,
}

impl SelectionCriteria {
  /// The built-in criteria for a property type with no learned history.
  pub fn default_for(property_type: PropertyType) -> Self {
    use MatchField as M;

    let base = Self {
      max_distance_km:               2.0,
      optimal_distance_km:           1.0,
      area_ratio_min:                0.7,
      area_ratio_max:                1.3,
      required_matches:              vec![M::PropertyType],
      preferred_matches:             vec![M::Bedrooms, M::Bathrooms],
      max_comparable_age_days:       365,
      preferred_comparable_age_days: 180,
    };

    match property_type {
      PropertyType::Apartment | PropertyType::Studio | PropertyType::Duplex => Self {
        max_distance_km: 1.0,
        optimal_distance_km: 0.5,
        required_matches: vec![M::PropertyType, M::Bedrooms],
        preferred_matches: vec![M::Bathrooms, M::Condition],
        ..base
      },
      PropertyType::Penthouse => Self {
        max_distance_km: 1.5,
        optimal_distance_km: 0.75,
        area_ratio_min: 0.75,
        area_ratio_max: 1.25,
        preferred_matches: vec![M::Bedrooms, M::Features],
        ..base
      },
      PropertyType::House | PropertyType::Villa | PropertyType::Townhouse => Self {
        max_distance_km: 3.0,
        optimal_distance_km: 1.5,
        area_ratio_min: 0.6,
        area_ratio_max: 1.5,
        preferred_matches: vec![M::Bedrooms, M::Features],
        max_comparable_age_days: 540,
        preferred_comparable_age_days: 270,
        ..base
      },
      _ => base,
    }
  }

  /// Keep the band ordered and the optimum inside the maximum.
  pub fn normalize(&mut self) {
    self.max_distance_km = self.max_distance_km.max(0.1);
    self.optimal_distance_km = self.optimal_distance_km.clamp(0.05, self.max_distance_km);
    self.area_ratio_min = self.area_ratio_min.clamp(0.1, 1.0);
    self.area_ratio_max = self.area_ratio_max.max(1.0).max(self.area_ratio_min);
    self.preferred_comparable_age_days =
      self.preferred_comparable_age_days.clamp(30, self.max_comparable_age_days.max(30));
  }
}

// ─── Weights ─────────────────────────────────────────────────────────────────

/// The relative weight of each similarity dimension.
///
/// Weights rank dimensions against each other; they are not required to sum
/// to one, but each is kept within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
  pub location:          f64,
  pub size:              f64,
  pub condition:         f64,
  pub age:               f64,
  pub features:          f64,
  pub recency:           f64,
  pub market_conditions: f64,
  /// Named per-type or per-region overrides, e.g. `"sea_view"`.
  #[serde(default)]
  pub overrides:         BTreeMap<String, f64>,
}

impl FeatureWeights {
  pub fn default_for(property_type: PropertyType) -> Self {
    let (location, size, condition, age, features, recency, market_conditions) =
      match property_type {
        PropertyType::Apartment | PropertyType::Studio | PropertyType::Duplex => {
          (0.30, 0.20, 0.15, 0.10, 0.10, 0.10, 0.05)
        }
        PropertyType::Penthouse => (0.35, 0.15, 0.10, 0.05, 0.25, 0.05, 0.05),
        PropertyType::House | PropertyType::Villa | PropertyType::Townhouse => {
          (0.20, 0.30, 0.15, 0.05, 0.20, 0.05, 0.05)
        }
        _ => (0.25, 0.25, 0.15, 0.10, 0.10, 0.10, 0.05),
      };
    Self {
      location,
      size,
      condition,
      age,
      features,
      recency,
      market_conditions,
      overrides: BTreeMap::new(),
    }
  }

  /// Clamp every weight into `[0, 1]`.
  pub fn clamp(&mut self) {
    for w in [
      &mut self.location,
      &mut self.size,
      &mut self.condition,
      &mut self.age,
      &mut self.features,
      &mut self.recency,
      &mut self.market_conditions,
    ] {
      *w = clamp_unit(*w);
    }
    for w in self.overrides.values_mut() {
      *w = clamp_unit(*w);
    }
  }

  pub fn total(&self) -> f64 {
    self.location
      + self.size
      + self.condition
      + self.age
      + self.features
      + self.recency
      + self.market_conditions
  }
}

// ─── Patterns ────────────────────────────────────────────────────────────────

/// A named comparable selection that users rated well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessPattern {
  pub name:              String,
  pub avg_distance_km:   f64,
  pub area_ratio_spread: f64,
  pub comparable_count:  usize,
  pub use_count:         u32,
  /// 0–1.
  pub success_rate:      f64,
  pub last_used:         DateTime<Utc>,
}

// ─── Intelligence ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableIntelligence {
  /// Normalised region name.
  pub region:                String,
  pub property_type:         PropertyType,
  pub criteria:              SelectionCriteria,
  pub weights:               FeatureWeights,
  pub success_patterns:      Vec<SuccessPattern>,
  pub analyses:              u32,
  pub feedback_count:        u32,
  /// Running €/m² observed for this segment.
  pub observed_price_per_m2: f64,
  /// 0–100.
  pub selection_accuracy:    f64,
  /// 0–100.
  pub valuation_accuracy:    f64,
  /// 0–100.
  pub learning_confidence:   f64,
  pub created_at:            DateTime<Utc>,
  pub last_updated:          DateTime<Utc>,
}

/// Starting point for both accuracy scores before any evidence.
pub const NEUTRAL_ACCURACY: f64 = 50.0;

impl ComparableIntelligence {
  pub fn new(region: &str, property_type: PropertyType, now: DateTime<Utc>) -> Self {
    Self {
      region: normalize_name(region),
      property_type,
      criteria: SelectionCriteria::default_for(property_type),
      weights: FeatureWeights::default_for(property_type),
      success_patterns: Vec::new(),
      analyses: 0,
      feedback_count: 0,
      observed_price_per_m2: 0.0,
      selection_accuracy: NEUTRAL_ACCURACY,
      valuation_accuracy: NEUTRAL_ACCURACY,
      learning_confidence: 0.0,
      created_at: now,
      last_updated: now,
    }
  }

  pub fn key_for(region: &str, property_type: PropertyType) -> String {
    format!("{}:{}", normalize_name(region), property_type)
  }
}

impl Record for ComparableIntelligence {
  const COLLECTION: Collection = Collection::ComparableIntelligence;

  fn key(&self) -> String { Self::key_for(&self.region, self.property_type) }
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn every_type_has_weights_in_unit_range() {
    for t in PropertyType::iter() {
      let w = FeatureWeights::default_for(t);
      let mut clamped = w.clone();
      clamped.clamp();
      assert_eq!(w, clamped, "{t} default weights out of range");
      assert!((w.total() - 1.0).abs() < 1e-9);
    }
  }

  #[test]
  fn type_sensitive_defaults() {
    let apt = FeatureWeights::default_for(PropertyType::Apartment);
    let house = FeatureWeights::default_for(PropertyType::House);
    let ph = FeatureWeights::default_for(PropertyType::Penthouse);

    assert!(apt.location > house.location);
    assert!(house.size > apt.size);
    assert!(house.features > apt.features);
    assert!(ph.location >= apt.location && ph.features > house.features);

    let crit = SelectionCriteria::default_for(PropertyType::Villa);
    assert_eq!(crit.max_distance_km, 3.0);
  }

  #[test]
  fn normalize_keeps_invariants() {
    let mut c = SelectionCriteria::default_for(PropertyType::Apartment);
    c.optimal_distance_km = 9.0;
    c.area_ratio_min = 1.4;
    c.area_ratio_max = 0.9;
    c.normalize();
    assert!(c.optimal_distance_km <= c.max_distance_km);
    assert!(c.area_ratio_min <= 1.0 && c.area_ratio_max >= 1.0);
  }
}
