//! PredictionTracker: forecasts captured at analysis time, validated against
//! actual outcomes once they are old enough.

use std::{collections::BTreeMap, convert::Infallible, future::Future};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasa_core::{
  feedback::Feedback,
  identity::normalize_name,
  prediction::{
    ActualOutcome, BiasDirection, Prediction, PredictionBias, PredictionValidation,
    QualityBucket,
  },
  report::{Report, Trend},
  stats::{mean, moving_average},
  store::KnowledgeStore,
};
use uuid::Uuid;

use crate::{config::LearningConfig, knowledge::Knowledge};

const PRICE_WEIGHT: f64 = 0.7;
const TREND_WEIGHT: f64 = 0.3;
/// Window of the accuracy moving average.
const ACCURACY_TREND_WINDOW: usize = 10;
/// Signed price bias (percent) beyond which a prediction leans one way.
const BIAS_THRESHOLD_PCT: f64 = 5.0;
/// Data quality assumed for reports that do not state one.
const UNSTATED_DATA_QUALITY: f64 = 50.0;

// ─── Outcome sources ─────────────────────────────────────────────────────────

/// Where actual sale outcomes come from.
///
/// `Ok(None)` means no outcome is available yet; the prediction is skipped
/// and asked about again on the next validation run.
pub trait OutcomeSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn actual_outcome(
    &self,
    prediction: &Prediction,
  ) -> impl Future<Output = Result<Option<ActualOutcome>, Self::Error>> + Send;
}

/// An outcome source that never has anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOutcomes;

impl OutcomeSource for NoOutcomes {
  type Error = Infallible;

  async fn actual_outcome(&self, _: &Prediction) -> Result<Option<ActualOutcome>, Infallible> {
    Ok(None)
  }
}

/// Reads verified sale prices from feedback outcome records.
pub struct FeedbackOutcomes<S> {
  knowledge: Knowledge<S>,
}

impl<S: KnowledgeStore> FeedbackOutcomes<S> {
  pub fn new(knowledge: Knowledge<S>) -> Self { Self { knowledge } }
}

impl<S: KnowledgeStore> OutcomeSource for FeedbackOutcomes<S> {
  type Error = Infallible;

  async fn actual_outcome(
    &self,
    prediction: &Prediction,
  ) -> Result<Option<ActualOutcome>, Infallible> {
    let feedback: Vec<Feedback> = self.knowledge.all().await;
    let latest = feedback
      .into_iter()
      .filter(|f| f.property_id.as_deref() == Some(prediction.property_id.as_str()))
      .filter_map(|f| f.outcome)
      .filter(|o| o.actual_sale_price.is_some_and(|p| p > 0.0))
      .max_by_key(|o| o.verified_at);

    Ok(latest.and_then(|o| {
      Some(ActualOutcome {
        property_id:  prediction.property_id.clone(),
        actual_price: o.actual_sale_price?,
        // A confirmed trend is the predicted one; a refuted trend has no
        // known direction.
        actual_trend: o.trend_accurate.filter(|ok| *ok).map(|_| prediction.trend),
        observed_at:  o.verified_at,
        source:       "user-feedback".to_string(),
      })
    }))
  }
}

// ─── Accuracy ────────────────────────────────────────────────────────────────

/// `max(0, 100 − |predicted − actual| / actual · 100)`.
pub fn price_accuracy(predicted: f64, actual: f64) -> f64 {
  if actual <= 0.0 {
    return 0.0;
  }
  (100.0 - (predicted - actual).abs() / actual * 100.0).max(0.0)
}

/// 100 for an exact match, 50 when one side is stable, 0 for opposite
/// directions.
pub fn trend_accuracy(predicted: Trend, actual: Trend) -> f64 {
  match (predicted, actual) {
    (p, a) if p == a => 100.0,
    (Trend::Stable, _) | (_, Trend::Stable) => 50.0,
    _ => 0.0,
  }
}

/// Compare `prediction` with `actual`.
pub fn validate(
  prediction: &Prediction,
  actual: ActualOutcome,
  now: DateTime<Utc>,
) -> PredictionValidation {
  let price = price_accuracy(prediction.price_estimate, actual.actual_price);
  let trend = actual.actual_trend.map(|t| trend_accuracy(prediction.trend, t));
  let overall = match trend {
    Some(t) => PRICE_WEIGHT * price + TREND_WEIGHT * t,
    None => price,
  };
  let within_range =
    (prediction.price_low..=prediction.price_high).contains(&actual.actual_price);

  let price_bias_pct = if actual.actual_price > 0.0 {
    (prediction.price_estimate - actual.actual_price) / actual.actual_price * 100.0
  } else {
    0.0
  };
  let direction = if price_bias_pct > BIAS_THRESHOLD_PCT {
    BiasDirection::Overestimate
  } else if price_bias_pct < -BIAS_THRESHOLD_PCT {
    BiasDirection::Underestimate
  } else {
    BiasDirection::Neutral
  };
  let overconfident = prediction.confidence > overall;

  let mut success_factors = Vec::new();
  let mut failure_factors = Vec::new();
  if price >= 95.0 {
    success_factors.push("price estimate within 5%".to_string());
  } else if price < 85.0 {
    failure_factors.push(format!("price estimate off by {:.1}%", 100.0 - price));
  }
  if within_range {
    success_factors.push("actual price inside predicted range".to_string());
  } else {
    failure_factors.push("actual price outside predicted range".to_string());
  }
  match trend {
    Some(t) if t >= 100.0 => success_factors.push("trend direction correct".to_string()),
    Some(t) if t <= 0.0 => failure_factors.push("trend direction opposite".to_string()),
    _ => {}
  }
  match QualityBucket::of(prediction.data_quality) {
    QualityBucket::High => success_factors.push("high data quality".to_string()),
    QualityBucket::Low => failure_factors.push("low data quality".to_string()),
    QualityBucket::Medium => {}
  }
  if overconfident {
    failure_factors.push(format!(
      "stated confidence {:.0} exceeded realised accuracy {:.0}",
      prediction.confidence, overall
    ));
  }

  PredictionValidation {
    prediction_id: prediction.prediction_id,
    property_id: prediction.property_id.clone(),
    actual,
    price_accuracy: price,
    trend_accuracy: trend,
    overall_accuracy: overall,
    within_range,
    success_factors,
    failure_factors,
    bias: PredictionBias { price_bias_pct, direction, overconfident },
    validated_at: now,
  }
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracySummary {
  pub count:            usize,
  pub average_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasSummary {
  pub mean_price_bias_pct: f64,
  /// Share of validations whose stated confidence exceeded their accuracy.
  pub overconfidence_rate: f64,
  pub systematic:          BiasDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionAnalytics {
  pub total_predictions:        usize,
  pub total_validations:        usize,
  pub average_price_accuracy:   Option<f64>,
  pub average_trend_accuracy:   Option<f64>,
  pub average_overall_accuracy: Option<f64>,
  pub within_range_rate:        Option<f64>,
  pub by_method:                BTreeMap<String, AccuracySummary>,
  pub by_data_quality:          BTreeMap<QualityBucket, AccuracySummary>,
  /// Moving average of overall accuracy, oldest validation first.
  pub accuracy_trend:           Vec<f64>,
  pub bias:                     Option<BiasSummary>,
  pub suggestions:              Vec<String>,
}

fn summarize_groups<K: Ord>(groups: BTreeMap<K, Vec<f64>>) -> BTreeMap<K, AccuracySummary> {
  groups
    .into_iter()
    .filter_map(|(k, v)| {
      let average_accuracy = mean(&v)?;
      Some((k, AccuracySummary { count: v.len(), average_accuracy }))
    })
    .collect()
}

/// Aggregate validations against the predictions they validate.
pub fn analyze(
  predictions: &[Prediction],
  validations: &[PredictionValidation],
) -> PredictionAnalytics {
  let by_id: BTreeMap<Uuid, &Prediction> =
    predictions.iter().map(|p| (p.prediction_id, p)).collect();

  let mut ordered: Vec<&PredictionValidation> = validations.iter().collect();
  ordered.sort_by_key(|v| v.validated_at);

  let overall: Vec<f64> = ordered.iter().map(|v| v.overall_accuracy).collect();
  let price: Vec<f64> = ordered.iter().map(|v| v.price_accuracy).collect();
  let trend: Vec<f64> = ordered.iter().filter_map(|v| v.trend_accuracy).collect();

  let mut methods: BTreeMap<String, Vec<f64>> = BTreeMap::new();
  let mut quality: BTreeMap<QualityBucket, Vec<f64>> = BTreeMap::new();
  for v in &ordered {
    let Some(p) = by_id.get(&v.prediction_id) else {
      continue;
    };
    for m in &p.methods {
      methods.entry(m.clone()).or_default().push(v.overall_accuracy);
    }
    quality
      .entry(QualityBucket::of(p.data_quality))
      .or_default()
      .push(v.overall_accuracy);
  }

  let bias = if ordered.is_empty() {
    None
  } else {
    let biases: Vec<f64> = ordered.iter().map(|v| v.bias.price_bias_pct).collect();
    let mean_price_bias_pct = mean(&biases).unwrap_or_default();
    let overconfident = ordered.iter().filter(|v| v.bias.overconfident).count();
    Some(BiasSummary {
      mean_price_bias_pct,
      overconfidence_rate: overconfident as f64 / ordered.len() as f64,
      systematic: if mean_price_bias_pct > BIAS_THRESHOLD_PCT {
        BiasDirection::Overestimate
      } else if mean_price_bias_pct < -BIAS_THRESHOLD_PCT {
        BiasDirection::Underestimate
      } else {
        BiasDirection::Neutral
      },
    })
  };

  let by_method = summarize_groups(methods);
  let by_data_quality = summarize_groups(quality);
  let suggestions = suggest(&by_method, &by_data_quality, bias.as_ref());

  PredictionAnalytics {
    total_predictions: predictions.len(),
    total_validations: validations.len(),
    average_price_accuracy: mean(&price),
    average_trend_accuracy: mean(&trend),
    average_overall_accuracy: mean(&overall),
    within_range_rate: if ordered.is_empty() {
      None
    } else {
      Some(ordered.iter().filter(|v| v.within_range).count() as f64 / ordered.len() as f64)
    },
    by_method,
    by_data_quality,
    accuracy_trend: moving_average(&overall, ACCURACY_TREND_WINDOW),
    bias,
    suggestions,
  }
}

fn suggest(
  by_method: &BTreeMap<String, AccuracySummary>,
  by_quality: &BTreeMap<QualityBucket, AccuracySummary>,
  bias: Option<&BiasSummary>,
) -> Vec<String> {
  let mut out = Vec::new();
  if let Some(b) = bias {
    if b.overconfidence_rate > 0.5 {
      out.push(format!(
        "Stated confidence exceeded realised accuracy in {:.0}% of validations; lower confidence scores",
        b.overconfidence_rate * 100.0
      ));
    }
    match b.systematic {
      BiasDirection::Overestimate => out.push(format!(
        "Prices are overestimated by {:.1}% on average; review comparable selection",
        b.mean_price_bias_pct
      )),
      BiasDirection::Underestimate => out.push(format!(
        "Prices are underestimated by {:.1}% on average; review market adjustments",
        -b.mean_price_bias_pct
      )),
      BiasDirection::Neutral => {}
    }
  }
  if let (Some(high), Some(low)) =
    (by_quality.get(&QualityBucket::High), by_quality.get(&QualityBucket::Low))
    && high.average_accuracy - low.average_accuracy > 15.0
  {
    out.push("Low-quality data costs more than 15 accuracy points; gather more data before valuing".to_string());
  }
  if let Some((method, s)) = by_method
    .iter()
    .filter(|(_, s)| s.count >= 3)
    .min_by(|a, b| a.1.average_accuracy.total_cmp(&b.1.average_accuracy))
    && s.average_accuracy < 70.0
  {
    out.push(format!(
      "Method '{method}' averages {:.0}% accuracy; review or reduce its weight",
      s.average_accuracy
    ));
  }
  out
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// Result of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationRun {
  /// Predictions old enough and not yet validated.
  pub examined:  usize,
  pub validated: Vec<PredictionValidation>,
  /// Examined predictions with no available outcome.
  pub skipped:   usize,
}

pub struct PredictionTracker<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> PredictionTracker<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  /// Snapshot the report's forecast. Reports without a valuation carry no
  /// forecast and are ignored.
  pub async fn store_prediction(&self, report: &Report, now: DateTime<Utc>) -> Option<Prediction> {
    let Some(valuation) = report.valuation else {
      tracing::debug!(session = %report.session_id, "no valuation; prediction not stored");
      return None;
    };
    let prediction = Prediction {
      prediction_id:    Uuid::new_v4(),
      property_id:      report.property.identity(),
      session_id:       report.session_id.clone(),
      region:           normalize_name(&report.property.city),
      property_type:    report.property.property_type,
      price_low:        valuation.low,
      price_high:       valuation.high,
      price_estimate:   valuation.estimated,
      confidence:       valuation.confidence,
      trend:            report.market_trend.map(|t| t.direction).unwrap_or_default(),
      investment_grade: report.investment_grade,
      data_quality:     report.data_quality.unwrap_or(UNSTATED_DATA_QUALITY),
      methods:          report.methods.clone(),
      predicted_at:     now,
    };
    self.knowledge.save(&prediction).await.then_some(prediction)
  }

  pub async fn predictions(&self) -> Vec<Prediction> { self.knowledge.all().await }

  pub async fn validations(&self) -> Vec<PredictionValidation> { self.knowledge.all().await }

  pub async fn validation_for(&self, prediction_id: Uuid) -> Option<PredictionValidation> {
    self.knowledge.load(&prediction_id.to_string()).await
  }

  /// Validate every prediction past the minimum age that has no validation
  /// yet and whose outcome `source` can supply.
  pub async fn validate_predictions<O: OutcomeSource>(
    &self,
    source: &O,
    now: DateTime<Utc>,
  ) -> ValidationRun {
    let validated_ids: Vec<Uuid> = self
      .validations()
      .await
      .into_iter()
      .map(|v| v.prediction_id)
      .collect();
    let cutoff = now - self.config.prediction_min_age();
    let due: Vec<Prediction> = self
      .predictions()
      .await
      .into_iter()
      .filter(|p| p.predicted_at <= cutoff && !validated_ids.contains(&p.prediction_id))
      .collect();

    let mut run = ValidationRun { examined: due.len(), ..ValidationRun::default() };
    for prediction in due {
      let actual = match source.actual_outcome(&prediction).await {
        Ok(Some(actual)) => actual,
        Ok(None) => {
          run.skipped += 1;
          continue;
        }
        Err(e) => {
          tracing::warn!(prediction = %prediction.prediction_id, "outcome lookup failed: {e}");
          run.skipped += 1;
          continue;
        }
      };
      let validation = validate(&prediction, actual, now);
      tracing::debug!(
        prediction = %prediction.prediction_id,
        accuracy = validation.overall_accuracy,
        "prediction validated"
      );
      if self.knowledge.save(&validation).await {
        run.validated.push(validation);
      }
    }

    if !run.validated.is_empty() {
      tracing::info!(
        validated = run.validated.len(),
        skipped = run.skipped,
        "prediction validation pass complete"
      );
    }
    run
  }

  pub async fn analytics(&self) -> PredictionAnalytics {
    analyze(&self.predictions().await, &self.validations().await)
  }
}
