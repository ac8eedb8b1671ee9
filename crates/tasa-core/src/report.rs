//! Inbound shapes: the finished property-analysis report handed to the
//! learning subsystem by the report-generation pipeline.
//!
//! These types are produced elsewhere (extraction, valuation, market APIs);
//! the learning layer only reads them.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::identity;

// ─── Enumerations ────────────────────────────────────────────────────────────

/// Kind of residential or commercial property.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PropertyType {
  #[default]
  Apartment,
  Penthouse,
  Studio,
  Duplex,
  House,
  Villa,
  Townhouse,
  Land,
  Commercial,
  Other,
}

impl PropertyType {
  /// Detached or semi-detached homes, where plot and built size dominate
  /// comparability.
  pub fn is_house_like(self) -> bool {
    matches!(self, Self::House | Self::Villa | Self::Townhouse)
  }
}

/// Direction of a price trend.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Trend {
  #[serde(alias = "up")]
  Rising,
  #[default]
  Stable,
  #[serde(alias = "down")]
  Falling,
}

/// A–F letter summarising appreciation, yield, liquidity and risk.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
)]
pub enum InvestmentGrade {
  A,
  B,
  #[default]
  C,
  D,
  E,
  F,
}

impl InvestmentGrade {
  /// Map a 0–100 point score onto a grade.
  pub fn from_score(score: f64) -> Self {
    match score {
      s if s >= 80.0 => Self::A,
      s if s >= 65.0 => Self::B,
      s if s >= 50.0 => Self::C,
      s if s >= 35.0 => Self::D,
      s if s >= 20.0 => Self::E,
      _ => Self::F,
    }
  }
}

/// Meteorological season (northern hemisphere).
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Season {
  Winter,
  Spring,
  Summer,
  Autumn,
}

impl Season {
  pub fn of(at: DateTime<Utc>) -> Self {
    match at.month() {
      3..=5 => Self::Spring,
      6..=8 => Self::Summer,
      9..=11 => Self::Autumn,
      _ => Self::Winter,
    }
  }
}

/// Whether a future development is expected to lift or depress prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactKind {
  Positive,
  #[default]
  Neutral,
  Negative,
}

// ─── Property ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub latitude:  f64,
  pub longitude: f64,
}

/// Structured attributes of the analysed property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
  pub address:       String,
  pub city:          String,
  pub province:      String,
  #[serde(default)]
  pub neighborhood:  Option<String>,
  #[serde(default)]
  pub postal_code:   Option<String>,
  #[serde(default)]
  pub property_type: PropertyType,
  #[serde(default)]
  pub area_m2:       Option<f64>,
  #[serde(default)]
  pub bedrooms:      Option<u32>,
  #[serde(default)]
  pub bathrooms:     Option<u32>,
  #[serde(default)]
  pub year_built:    Option<u32>,
  #[serde(default)]
  pub condition:     Option<String>,
  #[serde(default)]
  pub features:      Vec<String>,
  #[serde(default)]
  pub coordinates:   Option<Coordinates>,
}

impl Property {
  /// Stable identity used to key analysis history and predictions.
  pub fn identity(&self) -> String {
    identity::property_id(&self.address, &self.city, &self.province)
  }
}

// ─── Report sections ─────────────────────────────────────────────────────────

/// The valuation block of a report. `confidence` is on a 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
  pub low:          f64,
  pub high:         f64,
  pub estimated:    f64,
  pub confidence:   f64,
  /// Estimated achievable monthly rent, when the pipeline produced one.
  #[serde(default)]
  pub monthly_rent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketTrend {
  pub direction:         Trend,
  /// Year-over-year price change in percent.
  pub yearly_change_pct: f64,
  #[serde(default)]
  pub days_on_market:    Option<f64>,
}

/// A previously sold or listed property used as a valuation reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comparable {
  pub address:       String,
  pub price:         f64,
  pub area_m2:       f64,
  pub distance_km:   f64,
  #[serde(default)]
  pub property_type: PropertyType,
  #[serde(default)]
  pub bedrooms:      Option<u32>,
  #[serde(default)]
  pub bathrooms:     Option<u32>,
  /// Days since the comparable sold or was listed.
  #[serde(default)]
  pub age_days:      Option<u32>,
  #[serde(default)]
  pub features:      Vec<String>,
}

impl Comparable {
  pub fn price_per_m2(&self) -> Option<f64> {
    (self.area_m2 > 0.0).then(|| self.price / self.area_m2)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amenity {
  pub name:        String,
  /// Free-form category, e.g. "school", "beach", "golf".
  pub kind:        String,
  pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutureDevelopment {
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub impact:      ImpactKind,
  pub distance_km: f64,
}

/// One prompt invocation made while producing the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUsage {
  pub category:   crate::prompt::PromptCategory,
  pub template:   String,
  #[serde(default)]
  pub latency_ms: f64,
  #[serde(default)]
  pub cost:       f64,
  /// Whether the response parsed into the expected structure.
  pub success:    bool,
  /// Quality score assigned by the pipeline on a 1–5 scale.
  #[serde(default)]
  pub quality:    Option<f64>,
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// A finished property-analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
  pub session_id:       String,
  pub property:         Property,
  #[serde(default)]
  pub valuation:        Option<Valuation>,
  #[serde(default)]
  pub market_trend:     Option<MarketTrend>,
  #[serde(default)]
  pub comparables:      Vec<Comparable>,
  #[serde(default)]
  pub amenities:        Vec<Amenity>,
  #[serde(default)]
  pub developments:     Vec<FutureDevelopment>,
  #[serde(default)]
  pub summary:          String,
  #[serde(default)]
  pub investment_grade: Option<InvestmentGrade>,
  /// 0–100 score for the completeness of the underlying data.
  #[serde(default)]
  pub data_quality:     Option<f64>,
  /// Names of the valuation methods that contributed.
  #[serde(default)]
  pub methods:          Vec<String>,
  #[serde(default)]
  pub prompts:          Vec<PromptUsage>,
  pub generated_at:     DateTime<Utc>,
}

impl Report {
  /// Estimated price per square metre, when both valuation and area exist.
  pub fn price_per_m2(&self) -> Option<f64> {
    let area = self.property.area_m2.filter(|a| *a > 0.0)?;
    self.valuation.map(|v| v.estimated / area)
  }
}
