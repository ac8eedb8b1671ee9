//! The [`LearningOrchestrator`]: one entry point that fans reports and
//! feedback out to every learning component and answers the pipeline's
//! queries with defaulted values.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasa_core::{
  Resolved,
  comparable::SelectionCriteria,
  feedback::{Component, Feedback},
  identity::template_hash,
  prediction::Prediction,
  prompt::{PromptCategory, PromptOptimization},
  report::{Property, PropertyType, Report, Season},
  store::KnowledgeStore,
};
use uuid::Uuid;

use crate::{
  comparable::{ComparableSelectionEngine, ComparableSummary, EnhancedCriteria},
  config::LearningConfig,
  deepening::{DeepeningStrategy, LevelMetrics, ProgressiveDeepening},
  feedback::{FeedbackStore, SatisfactionMetrics, SatisfactionTrend},
  knowledge::Knowledge,
  location::{DecayReport, LocationLearner, LocationLearning, LocationStats},
  prediction::{
    FeedbackOutcomes, OutcomeSource, PredictionAnalytics, PredictionTracker, ValidationRun,
  },
  prompt::{PromptAnalytics, PromptPerformanceStore},
  regional::{
    MarketPatterns, PerformancePrediction, RegionalInsights, RegionalIntelligence,
    RegionalSummary,
  },
};

/// The prompt category that produces each rated report component.
pub fn prompt_category(component: Component) -> PromptCategory {
  match component {
    Component::Valuation => PromptCategory::Valuation,
    Component::Comparables => PromptCategory::Comparables,
    Component::MarketTrends => PromptCategory::MarketAnalysis,
    Component::Amenities => PromptCategory::Amenities,
    Component::Developments => PromptCategory::Developments,
    Component::Summary => PromptCategory::Summary,
    Component::Investment => PromptCategory::Investment,
  }
}

fn rated_component(category: PromptCategory) -> Component {
  match category {
    PromptCategory::Valuation => Component::Valuation,
    PromptCategory::Comparables => Component::Comparables,
    PromptCategory::MarketAnalysis => Component::MarketTrends,
    PromptCategory::Amenities => Component::Amenities,
    PromptCategory::Developments => Component::Developments,
    PromptCategory::Summary => Component::Summary,
    PromptCategory::Investment => Component::Investment,
  }
}

/// Quality score (0–100) for a report that arrives without one.
///
/// Valuation confidence 30, comparable count 25, market trend 15,
/// coordinates 10, summary length 20.
pub fn default_quality(report: &Report) -> f64 {
  let confidence = report
    .valuation
    .map_or(0.0, |v| v.confidence.clamp(0.0, 100.0) / 100.0 * 30.0);
  let comparables = report.comparables.len().min(5) as f64 / 5.0 * 25.0;
  let trend = if report.market_trend.is_some() { 15.0 } else { 0.0 };
  let coordinates = if report.property.coordinates.is_some() { 10.0 } else { 0.0 };
  let summary = report.summary.trim().chars().count().min(500) as f64 / 500.0 * 20.0;
  confidence + comparables + trend + coordinates + summary
}

// ─── Outbound shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackProcessing {
  Accepted {
    feedback_id:         Uuid,
    low_rated:           Vec<Component>,
    optimizations:       Vec<PromptOptimization>,
    comparables_updated: bool,
    history_updated:     bool,
  },
  Rejected {
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisUpdate {
  pub property_id:           String,
  pub quality:               f64,
  pub regions_updated:       usize,
  pub comparable_confidence: Option<f64>,
  pub location:              LocationLearning,
  pub prediction_id:         Option<Uuid>,
  pub prompts_recorded:      usize,
  pub deepening_level:       Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationArea {
  Feedback,
  Predictions,
  Regional,
  Comparables,
  Prompts,
  Locations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
  pub priority: Priority,
  pub area:     RecommendationArea,
  pub message:  String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningReport {
  pub generated_at:    DateTime<Utc>,
  pub feedback:        SatisfactionMetrics,
  pub predictions:     PredictionAnalytics,
  pub regional:        RegionalSummary,
  pub comparables:     ComparableSummary,
  pub prompts:         PromptAnalytics,
  pub locations:       LocationStats,
  pub deepening:       Vec<LevelMetrics>,
  pub market_patterns: MarketPatterns,
  pub recommendations: Vec<Recommendation>,
}

/// Derive recommendations from the system-wide analytics, most urgent first.
pub fn recommend(
  feedback: &SatisfactionMetrics,
  predictions: &PredictionAnalytics,
  regional: &RegionalSummary,
  comparables: &ComparableSummary,
  prompts: &PromptAnalytics,
  locations: &LocationStats,
) -> Vec<Recommendation> {
  use Priority::*;
  use RecommendationArea as A;

  let mut out = Vec::new();
  let mut push = |priority, area, message: String| {
    out.push(Recommendation { priority, area, message });
  };

  if let Some(avg) = feedback.average_rating
    && avg < 3.5
  {
    push(High, A::Feedback, format!("average user rating is {avg:.1}; review the weakest components"));
  }
  if feedback.trend == SatisfactionTrend::Declining {
    push(High, A::Feedback, "user satisfaction is declining".to_string());
  }
  for c in &feedback.weak_components {
    push(Medium, A::Feedback, format!("{c} is rated below 3 on average"));
  }

  if let Some(acc) = predictions.average_overall_accuracy
    && acc < 70.0
  {
    push(High, A::Predictions, format!("validated prediction accuracy is {acc:.0}%"));
  }
  if let Some(bias) = &predictions.bias {
    if bias.systematic != tasa_core::prediction::BiasDirection::Neutral {
      push(
        Medium,
        A::Predictions,
        format!("predictions systematically {} prices ({:+.1}%)", bias.systematic, bias.mean_price_bias_pct),
      );
    }
    if bias.overconfidence_rate > 0.5 {
      push(Medium, A::Predictions, "stated confidence regularly exceeds realised accuracy".to_string());
    }
  }
  if predictions.total_predictions > 0 && predictions.total_validations == 0 {
    push(Low, A::Predictions, "no prediction has been validated yet; connect an outcome source".to_string());
  }

  if regional.regions > 0 && regional.reliable_regions == 0 {
    push(Medium, A::Regional, "no region has enough data for performance forecasts".to_string());
  }
  if comparables.segments > 0 && comparables.learned_segments == 0 {
    push(Low, A::Comparables, "comparable selection still runs on type defaults everywhere".to_string());
  }

  if !prompts.underperformers.is_empty() {
    push(
      Medium,
      A::Prompts,
      format!("{} prompt templates underperform; run prompt optimization", prompts.underperformers.len()),
    );
  }
  if prompts.running_tests > 0 {
    push(Low, A::Prompts, format!("{} A/B tests are still running", prompts.running_tests));
  }

  if locations.relationships > 0 && locations.graduated_relationships == 0 {
    push(Low, A::Locations, "no location relationship has graduated yet".to_string());
  }

  out.sort_by_key(|r| (r.priority, r.area));
  out
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct LearningOrchestrator<S> {
  store:       Arc<S>,
  feedback:    FeedbackStore<S>,
  regional:    RegionalIntelligence<S>,
  comparables: ComparableSelectionEngine<S>,
  predictions: PredictionTracker<S>,
  prompts:     PromptPerformanceStore<S>,
  locations:   LocationLearner<S>,
  deepening:   ProgressiveDeepening<S>,
}

impl<S: KnowledgeStore> LearningOrchestrator<S> {
  pub fn new(store: Arc<S>, config: LearningConfig) -> Self {
    let k = Knowledge::new(Arc::clone(&store));
    Self {
      feedback: FeedbackStore::new(k.clone()),
      regional: RegionalIntelligence::new(k.clone(), config.clone()),
      comparables: ComparableSelectionEngine::new(k.clone(), config.clone()),
      predictions: PredictionTracker::new(k.clone(), config.clone()),
      prompts: PromptPerformanceStore::new(k.clone(), config.clone()),
      locations: LocationLearner::new(k.clone(), config.clone()),
      deepening: ProgressiveDeepening::new(k, config),
      store,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn feedback(&self) -> &FeedbackStore<S> { &self.feedback }

  pub fn regional(&self) -> &RegionalIntelligence<S> { &self.regional }

  pub fn comparables(&self) -> &ComparableSelectionEngine<S> { &self.comparables }

  pub fn predictions(&self) -> &PredictionTracker<S> { &self.predictions }

  pub fn prompts(&self) -> &PromptPerformanceStore<S> { &self.prompts }

  pub fn locations(&self) -> &LocationLearner<S> { &self.locations }

  pub fn deepening(&self) -> &ProgressiveDeepening<S> { &self.deepening }

  /// An outcome source backed by the verified outcomes in stored feedback.
  pub fn feedback_outcomes(&self) -> FeedbackOutcomes<S> {
    FeedbackOutcomes::new(Knowledge::new(Arc::clone(&self.store)))
  }

  // ─── Inbound ───────────────────────────────────────────────────────────────

  /// Validate, persist and learn from one feedback. `report` is the report
  /// the feedback is about, when the caller still has it.
  pub async fn process_user_feedback(
    &self,
    feedback: &Feedback,
    report: Option<&Report>,
    now: DateTime<Utc>,
  ) -> FeedbackProcessing {
    if let Err(e) = self.feedback.submit(feedback).await {
      tracing::warn!(feedback_id = %feedback.feedback_id, "feedback rejected: {e}");
      return FeedbackProcessing::Rejected { reason: e.to_string() };
    }

    let mut comparables_updated = false;
    if let Some(report) = report {
      for usage in &report.prompts {
        let rating = feedback
          .component(rated_component(usage.category))
          .map_or(feedback.overall_rating, |r| r.rating);
        self
          .prompts
          .record_rating(usage.category, &usage.template, f64::from(rating), now)
          .await;
      }
      comparables_updated = self
        .comparables
        .learn_from_feedback(&report.property, &report.comparables, feedback, now)
        .await
        .is_some();
    }

    let low_rated = feedback.low_rated_components();
    let mut optimizations = Vec::new();
    for component in &low_rated {
      let category = prompt_category(*component);
      tracing::info!(%component, %category, "low-rated component; optimizing prompts");
      optimizations.extend(self.prompts.optimize_category(category, now).await);
    }

    let property_id = feedback
      .property_id
      .clone()
      .or_else(|| report.map(|r| r.property.identity()));
    let history_updated = match &property_id {
      Some(id) => self.deepening.attach_feedback(id, feedback).await.is_some(),
      None => false,
    };

    tracing::info!(
      feedback_id = %feedback.feedback_id,
      rating = feedback.overall_rating,
      low_rated = low_rated.len(),
      optimizations = optimizations.len(),
      "feedback processed"
    );
    FeedbackProcessing::Accepted {
      feedback_id: feedback.feedback_id,
      low_rated,
      optimizations,
      comparables_updated,
      history_updated,
    }
  }

  /// Fold a finished report into every knowledge store.
  pub async fn update_regional_knowledge(
    &self,
    report: &Report,
    quality: Option<f64>,
    now: DateTime<Utc>,
  ) -> AnalysisUpdate {
    let quality = quality.unwrap_or_else(|| default_quality(report)).clamp(0.0, 100.0);

    let regions_updated = self.regional.learn_from_analysis(report, quality, now).await.len();
    let comparable_confidence = self
      .comparables
      .learn_from_analysis(report, now)
      .await
      .map(|ci| ci.learning_confidence);
    let location = self.locations.learn_from_report(report, now).await;
    let prediction_id = self
      .predictions
      .store_prediction(report, now)
      .await
      .map(|p| p.prediction_id);

    let mut prompts_recorded = 0;
    let mut prompt_versions = Vec::new();
    for usage in &report.prompts {
      if self.prompts.record_usage(usage, now).await.is_some() {
        prompts_recorded += 1;
      }
      prompt_versions.push(format!("{}:{}", usage.category, template_hash(&usage.template)));
    }
    let deepening_level = self
      .deepening
      .record_analysis(report, quality, prompt_versions, now)
      .await
      .map(|h| h.current_level);

    let update = AnalysisUpdate {
      property_id: report.property.identity(),
      quality,
      regions_updated,
      comparable_confidence,
      location,
      prediction_id,
      prompts_recorded,
      deepening_level,
    };
    tracing::info!(
      session = %report.session_id,
      property_id = %update.property_id,
      quality,
      regions = regions_updated,
      "analysis learned"
    );
    update
  }

  // ─── Queries ───────────────────────────────────────────────────────────────

  pub async fn optimal_comparable_criteria(
    &self,
    region: &str,
    property_type: PropertyType,
  ) -> Resolved<SelectionCriteria> {
    self.comparables.optimal_criteria(region, property_type).await
  }

  pub async fn enhanced_criteria(&self, property: &Property) -> EnhancedCriteria {
    self.comparables.generate_enhanced_criteria(property).await
  }

  pub async fn best_prompt_template(&self, category: PromptCategory) -> Resolved<String> {
    self.prompts.best_prompt_template(category).await
  }

  pub async fn regional_insights(&self, region: &str) -> Option<RegionalInsights> {
    self.regional.regional_insights(region).await
  }

  pub async fn predict_property_performance(
    &self,
    property: &Property,
    season: Option<Season>,
  ) -> Option<PerformancePrediction> {
    self.regional.predict_property_performance(property, season).await
  }

  pub async fn deepening_strategy(
    &self,
    property: &Property,
    now: DateTime<Utc>,
  ) -> DeepeningStrategy {
    self.deepening.deepening_strategy(property, now).await
  }

  /// Validate due predictions and feed the results into comparable learning.
  pub async fn validate_predictions<O: OutcomeSource>(
    &self,
    source: &O,
    now: DateTime<Utc>,
  ) -> ValidationRun {
    let run = self.predictions.validate_predictions(source, now).await;
    if run.validated.is_empty() {
      return run;
    }
    let predictions: BTreeMap<Uuid, Prediction> = self
      .predictions
      .predictions()
      .await
      .into_iter()
      .map(|p| (p.prediction_id, p))
      .collect();
    for validation in &run.validated {
      if let Some(prediction) = predictions.get(&validation.prediction_id) {
        self
          .comparables
          .learn_from_validation(prediction, validation, now)
          .await;
      }
    }
    run
  }

  pub async fn detect_market_patterns(&self) -> MarketPatterns {
    self.regional.detect_market_patterns().await
  }

  pub async fn decay_locations(&self, now: DateTime<Utc>) -> DecayReport {
    self.locations.decay(now).await
  }

  pub async fn generate_learning_report(&self, now: DateTime<Utc>) -> LearningReport {
    let feedback = self.feedback.metrics().await;
    let predictions = self.predictions.analytics().await;
    let regional = self.regional.summary().await;
    let comparables = self.comparables.summary().await;
    let prompts = self.prompts.analytics().await;
    let locations = self.locations.stats().await;
    let recommendations =
      recommend(&feedback, &predictions, &regional, &comparables, &prompts, &locations);
    LearningReport {
      generated_at: now,
      deepening: self.deepening.level_metrics().await,
      market_patterns: self.regional.detect_market_patterns().await,
      feedback,
      predictions,
      regional,
      comparables,
      prompts,
      locations,
      recommendations,
    }
  }

  pub async fn system_recommendations(&self) -> Vec<Recommendation> {
    recommend(
      &self.feedback.metrics().await,
      &self.predictions.analytics().await,
      &self.regional.summary().await,
      &self.comparables.summary().await,
      &self.prompts.analytics().await,
      &self.locations.stats().await,
    )
  }
}

#[cfg(test)]
mod tests {
  use tasa_core::report::{Comparable, Coordinates, MarketTrend, Trend, Valuation};

  use super::*;

  fn report() -> Report {
    Report {
      session_id:       "s".into(),
      property:         Property {
        address: "Calle Larios 5".into(),
        city: "Málaga".into(),
        province: "Málaga".into(),
        area_m2: Some(100.0),
        coordinates: Some(Coordinates { latitude: 36.72, longitude: -4.42 }),
        ..Property::default()
      },
      valuation:        Some(Valuation {
        low:          270_000.0,
        high:         330_000.0,
        estimated:    300_000.0,
        confidence:   80.0,
        monthly_rent: None,
      }),
      market_trend:     Some(MarketTrend {
        direction:         Trend::Rising,
        yearly_change_pct: 4.0,
        days_on_market:    None,
      }),
      comparables:      vec![Comparable::default(); 3],
      amenities:        Vec::new(),
      developments:     Vec::new(),
      summary:          "x".repeat(250),
      investment_grade: None,
      data_quality:     None,
      methods:          Vec::new(),
      prompts:          Vec::new(),
      generated_at:     Utc::now(),
    }
  }

  #[test]
  fn quality_rubric() {
    let r = report();
    // 24 + 15 + 15 + 10 + 10
    assert!((default_quality(&r) - 74.0).abs() < 1e-9);

    let bare = Report {
      valuation: None,
      market_trend: None,
      comparables: Vec::new(),
      summary: String::new(),
      property: Property::default(),
      ..r
    };
    assert_eq!(default_quality(&bare), 0.0);
  }

  #[test]
  fn every_component_maps_to_a_category_and_back() {
    use strum::IntoEnumIterator;
    for c in Component::iter() {
      assert_eq!(rated_component(prompt_category(c)), c);
    }
  }

  #[test]
  fn recommendations_are_ordered_by_priority() {
    let feedback = crate::feedback::summarize(&[Feedback::new("s", 2)]);
    let predictions = crate::prediction::analyze(&[], &[]);
    let regional = RegionalSummary {
      regions:            2,
      by_granularity:     BTreeMap::new(),
      reliable_regions:   0,
      total_data_points:  2,
      average_confidence: Some(10.0),
    };
    let comparables = ComparableSummary {
      segments:           1,
      learned_segments:   0,
      average_confidence: Some(20.0),
      total_analyses:     1,
      total_feedback:     0,
      top_patterns:       Vec::new(),
    };
    let prompts = PromptAnalytics {
      categories:      BTreeMap::new(),
      underperformers: Vec::new(),
      optimizations:   0,
      running_tests:   0,
      completed_tests: 0,
    };
    let locations = LocationStats {
      relationships:           0,
      graduated_relationships: 0,
      urbanisations:           0,
      graduated_urbanisations: 0,
      clusters:                0,
      largest_cluster:         None,
    };

    let recs = recommend(&feedback, &predictions, &regional, &comparables, &prompts, &locations);
    let order: Vec<_> = recs.iter().map(|r| (r.priority, r.area)).collect();
    assert_eq!(order, vec![
      (Priority::High, RecommendationArea::Feedback),
      (Priority::Medium, RecommendationArea::Regional),
      (Priority::Low, RecommendationArea::Comparables),
    ]);
  }
}
