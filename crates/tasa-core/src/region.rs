//! Regional market knowledge.
//!
//! One [`RegionalKnowledge`] record exists per (granularity, region name).
//! The learning rules that mutate it live in `tasa-learning`; this module
//! only defines the persisted shape and its invariants.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
  identity::normalize_name,
  report::{ImpactKind, InvestmentGrade, PropertyType, Season},
  stats::RunningStats,
  store::{Collection, Record},
};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Geographic scope of a knowledge record, most specific first.
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
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Granularity {
  Neighborhood,
  PostalArea,
  City,
  Province,
}

/// Identifies a region: `"<granularity>:<normalised name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
  pub granularity: Granularity,
  pub name:        String,
}

impl RegionKey {
  pub fn new(granularity: Granularity, name: &str) -> Self {
    Self { granularity, name: normalize_name(name) }
  }
}

impl std::fmt::Display for RegionKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.granularity, self.name)
  }
}

// ─── Market characteristics ──────────────────────────────────────────────────

/// Qualitative level for inventory and demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
  Low,
  #[default]
  Medium,
  High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketCharacteristics {
  pub average_price_per_m2:   f64,
  /// Running accumulator behind `price_volatility`.
  pub price_stats:            RunningStats,
  /// Coefficient of variation of observed €/m², in percent.
  pub price_volatility:       f64,
  /// Year-over-year appreciation in percent.
  pub appreciation_rate:      f64,
  pub appreciation_samples:   u32,
  pub average_days_on_market: f64,
  pub days_on_market_samples: u32,
  pub inventory_level:        Level,
  pub demand_level:           Level,
  pub best_performing_types:  Vec<PropertyType>,
  pub worst_performing_types: Vec<PropertyType>,
  /// Gross rental yield in percent.
  pub rental_yield:           Option<f64>,
  pub rental_yield_samples:   u32,
  pub investment_grade:       InvestmentGrade,
  pub investment_score:       f64,
  pub risk_factors:           Vec<String>,
  pub opportunities:          Vec<String>,
}

// ─── Patterns ────────────────────────────────────────────────────────────────

/// Size band used to split pricing patterns.
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SizeBand {
  Small,
  Medium,
  Large,
}

impl SizeBand {
  pub fn of(area_m2: f64) -> Self {
    if area_m2 < 70.0 {
      Self::Small
    } else if area_m2 <= 150.0 {
      Self::Medium
    } else {
      Self::Large
    }
  }
}

/// Learned €/m² for one (property type, size band) within a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingPattern {
  pub property_type:        PropertyType,
  pub size_band:            SizeBand,
  pub average_price_per_m2: f64,
  /// Premium (positive) or discount versus the region average, in percent.
  pub premium_pct:          f64,
  pub sample_size:          u32,
  pub first_seen:           DateTime<Utc>,
  pub last_updated:         DateTime<Utc>,
}

/// Patterns with this many samples count as mature.
pub const MATURE_PATTERN_SAMPLES: u32 = 5;

impl PricingPattern {
  pub fn is_mature(&self) -> bool { self.sample_size >= MATURE_PATTERN_SAMPLES }
}

/// Distance bucket of a development relative to the analysed property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DistanceBucket {
  Immediate,
  Near,
  Area,
  Distant,
}

impl DistanceBucket {
  pub fn of(distance_km: f64) -> Self {
    if distance_km < 0.5 {
      Self::Immediate
    } else if distance_km < 2.0 {
      Self::Near
    } else if distance_km < 5.0 {
      Self::Area
    } else {
      Self::Distant
    }
  }

  /// Share of a development's base impact felt at this distance.
  pub fn attenuation(self) -> f64 {
    match self {
      Self::Immediate => 1.0,
      Self::Near => 0.6,
      Self::Area => 0.3,
      Self::Distant => 0.1,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentImpact {
  pub name:             String,
  pub impact:           ImpactKind,
  pub distance_bucket:  DistanceBucket,
  /// Base price impact before distance attenuation, in percent.
  pub price_impact_pct: f64,
  pub observations:     u32,
  pub first_seen:       DateTime<Utc>,
  pub last_seen:        DateTime<Utc>,
}

impl DevelopmentImpact {
  pub fn effective_impact_pct(&self) -> f64 {
    self.price_impact_pct * self.distance_bucket.attenuation()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalAdjustment {
  pub season:                    Season,
  /// Observed €/m² versus the region average at observation time, percent.
  pub price_adjustment_pct:      f64,
  pub days_on_market_adjustment: f64,
  pub sample_size:               u32,
}

/// What buyers in a region have around them, sampled from reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicSnapshot {
  pub captured_at:      DateTime<Utc>,
  pub property_type:    PropertyType,
  pub bedrooms:         Option<u32>,
  /// Amenity kind → count within 2 km.
  pub nearby_amenities: BTreeMap<String, u32>,
}

/// Bound on retained demographic snapshots per region.
pub const MAX_DEMOGRAPHIC_SNAPSHOTS: usize = 24;

// ─── Knowledge ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalKnowledge {
  pub region:              RegionKey,
  /// Display name as first seen.
  pub display_name:        String,
  pub market:              MarketCharacteristics,
  pub pricing_patterns:    Vec<PricingPattern>,
  pub development_impacts: Vec<DevelopmentImpact>,
  pub seasonal:            Vec<SeasonalAdjustment>,
  pub demographics:        Vec<DemographicSnapshot>,
  pub data_points:         u32,
  /// 0–100.
  pub confidence:          f64,
  pub created_at:          DateTime<Utc>,
  pub last_updated:        DateTime<Utc>,
}

impl RegionalKnowledge {
  pub fn new(region: RegionKey, display_name: &str, now: DateTime<Utc>) -> Self {
    Self {
      region,
      display_name: display_name.trim().to_string(),
      market: MarketCharacteristics::default(),
      pricing_patterns: Vec::new(),
      development_impacts: Vec::new(),
      seasonal: Vec::new(),
      demographics: Vec::new(),
      data_points: 0,
      confidence: 0.0,
      created_at: now,
      last_updated: now,
    }
  }

  pub fn pattern(&self, property_type: PropertyType) -> Option<&PricingPattern> {
    self
      .pricing_patterns
      .iter()
      .filter(|p| p.property_type == property_type)
      .max_by_key(|p| p.sample_size)
  }

  pub fn seasonal_adjustment(&self, season: Season) -> Option<&SeasonalAdjustment> {
    self.seasonal.iter().find(|s| s.season == season)
  }
}

impl Record for RegionalKnowledge {
  const COLLECTION: Collection = Collection::RegionalKnowledge;

  fn key(&self) -> String { self.region.to_string() }
}
