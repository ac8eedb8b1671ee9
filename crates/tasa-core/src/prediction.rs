//! Market predictions captured at analysis time and their later validation.
//!
//! A [`Prediction`] is immutable once stored. A [`PredictionValidation`] is
//! keyed by the prediction it validates, so a prediction has at most one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  report::{InvestmentGrade, PropertyType, Trend},
  store::{Collection, Record},
};

/// Snapshot of a report's forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub prediction_id:    Uuid,
  pub property_id:      String,
  pub session_id:       String,
  /// Normalised city name.
  pub region:           String,
  pub property_type:    PropertyType,
  pub price_low:        f64,
  pub price_high:       f64,
  pub price_estimate:   f64,
  /// Stated confidence, 0–100.
  pub confidence:       f64,
  pub trend:            Trend,
  pub investment_grade: Option<InvestmentGrade>,
  /// 0–100 completeness of the data behind the forecast.
  pub data_quality:     f64,
  pub methods:          Vec<String>,
  pub predicted_at:     DateTime<Utc>,
}

impl Record for Prediction {
  const COLLECTION: Collection = Collection::MarketPredictions;

  fn key(&self) -> String { self.prediction_id.to_string() }
}

/// An externally observed result for a predicted property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualOutcome {
  pub property_id:  String,
  pub actual_price: f64,
  #[serde(default)]
  pub actual_trend: Option<Trend>,
  pub observed_at:  DateTime<Utc>,
  /// Where the outcome came from, e.g. "user-feedback" or "registry".
  pub source:       String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BiasDirection {
  Overestimate,
  Underestimate,
  Neutral,
}

/// Systematic error in one validated prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBias {
  /// `(predicted - actual) / actual * 100`; positive means overestimate.
  pub price_bias_pct: f64,
  pub direction:      BiasDirection,
  /// Stated confidence exceeded the realised overall accuracy.
  pub overconfident:  bool,
}

/// The comparison of a prediction against its actual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionValidation {
  pub prediction_id:    Uuid,
  pub property_id:      String,
  pub actual:           ActualOutcome,
  pub price_accuracy:   f64,
  pub trend_accuracy:   Option<f64>,
  pub overall_accuracy: f64,
  /// The actual price fell inside the predicted low/high range.
  pub within_range:     bool,
  pub success_factors:  Vec<String>,
  pub failure_factors:  Vec<String>,
  pub bias:             PredictionBias,
  pub validated_at:     DateTime<Utc>,
}

impl Record for PredictionValidation {
  const COLLECTION: Collection = Collection::PredictionValidations;

  fn key(&self) -> String { self.prediction_id.to_string() }
}

/// Data-quality bucket used to slice accuracy analytics.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QualityBucket {
  High,
  Medium,
  Low,
}

impl QualityBucket {
  pub fn of(data_quality: f64) -> Self {
    if data_quality >= 80.0 {
      Self::High
    } else if data_quality >= 60.0 {
      Self::Medium
    } else {
      Self::Low
    }
  }
}
