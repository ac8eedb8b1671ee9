//! ComparableSelectionEngine: learns, per (region, property type), how
//! comparables should be chosen and weighted.
//!
//! Learned criteria and weights are only served once the segment's
//! `learning_confidence` clears the configured floor; below it the
//! type-specific defaults apply. Updates use an exponential moving average.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasa_core::{
  Resolved,
  comparable::{
    ComparableIntelligence, FeatureWeights, MatchField, SelectionCriteria, SuccessPattern,
  },
  feedback::{Component, Feedback},
  identity::normalize_name,
  prediction::{Prediction, PredictionValidation},
  report::{Comparable, Property, PropertyType, Report},
  stats::{clamp_confidence, ema, mean, running_mean},
  store::{KnowledgeStore, Record},
};

use crate::{config::LearningConfig, knowledge::Knowledge};

pub const COMPARABLE_ALPHA: f64 = 0.3;
/// Analyses within this deviation from the running €/m² are fully consistent.
const CONSISTENCY_BAND_PCT: f64 = 5.0;
/// Consistency points lost per percent of deviation beyond the band.
const CONSISTENCY_SLOPE: f64 = 5.0;
const SIZE_WEIGHT_DOMINANT: f64 = 0.3;
const FEATURE_WEIGHT_MINOR: f64 = 0.15;

// ─── Confidence ──────────────────────────────────────────────────────────────

/// min(40, 8·analyses) + 0.4·mean(selection, valuation accuracy)
/// + min(20, 5·success patterns).
pub fn learning_confidence(ci: &ComparableIntelligence) -> f64 {
  let volume = (8.0 * f64::from(ci.analyses)).min(40.0);
  let accuracy = (ci.selection_accuracy + ci.valuation_accuracy) / 2.0 * 0.4;
  let patterns = (5.0 * ci.success_patterns.len() as f64).min(20.0);
  clamp_confidence(volume + accuracy + patterns)
}

/// 100 within ±5% of the running €/m², falling 5 points per further percent.
pub fn consistency_score(observed: f64, running: f64) -> f64 {
  if running <= 0.0 {
    return 0.0;
  }
  let deviation = (observed / running - 1.0).abs() * 100.0;
  if deviation <= CONSISTENCY_BAND_PCT {
    100.0
  } else {
    (100.0 - (deviation - CONSISTENCY_BAND_PCT) * CONSISTENCY_SLOPE).max(0.0)
  }
}

fn settle(ci: &mut ComparableIntelligence, now: DateTime<Utc>) {
  ci.criteria.normalize();
  ci.weights.clamp();
  ci.selection_accuracy = clamp_confidence(ci.selection_accuracy);
  ci.valuation_accuracy = clamp_confidence(ci.valuation_accuracy);
  ci.learning_confidence = learning_confidence(ci);
  ci.last_updated = now;
}

// ─── Comment rules ───────────────────────────────────────────────────────────

/// One adjustment triggered by keywords in a negative comment.
pub struct CommentRule {
  pub name:     &'static str,
  pub keywords: &'static [&'static str],
  pub apply:    fn(&mut ComparableIntelligence),
}

fn shrink_radius(ci: &mut ComparableIntelligence) {
  ci.criteria.max_distance_km *= 0.9;
}

fn tighten_area_band(ci: &mut ComparableIntelligence) {
  let c = &mut ci.criteria;
  c.area_ratio_min = 1.0 - (1.0 - c.area_ratio_min) * 0.75;
  c.area_ratio_max = 1.0 + (c.area_ratio_max - 1.0) * 0.75;
}

fn raise_feature_weight(ci: &mut ComparableIntelligence) {
  ci.weights.features += 0.05;
}

fn prefer_recent(ci: &mut ComparableIntelligence) {
  let c = &mut ci.criteria;
  c.preferred_comparable_age_days = (f64::from(c.preferred_comparable_age_days) * 0.8) as u32;
  ci.weights.recency += 0.05;
}

pub const COMMENT_RULES: &[CommentRule] = &[
  CommentRule { name: "shrink_radius", keywords: &["distance", "far"], apply: shrink_radius },
  CommentRule { name: "tighten_area_band", keywords: &["size", "area"], apply: tighten_area_band },
  CommentRule { name: "raise_feature_weight", keywords: &["features"], apply: raise_feature_weight },
  CommentRule { name: "prefer_recent", keywords: &["old", "outdated"], apply: prefer_recent },
];

/// Rules whose keywords appear as whole words in `comment`.
pub fn matching_rules(comment: &str) -> Vec<&'static CommentRule> {
  let words: BTreeSet<String> = comment
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .map(str::to_lowercase)
    .collect();
  COMMENT_RULES
    .iter()
    .filter(|rule| rule.keywords.iter().any(|k| words.contains(*k)))
    .collect()
}

// ─── Enhanced criteria ───────────────────────────────────────────────────────

/// Search parameters for comparables of one subject property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedCriteria {
  pub learned:             bool,
  pub property_type:       PropertyType,
  pub max_distance_km:     f64,
  pub optimal_distance_km: f64,
  pub min_area_m2:         Option<f64>,
  pub max_area_m2:         Option<f64>,
  pub bedrooms:            Option<u32>,
  pub bathrooms:           Option<u32>,
  pub required_features:   Vec<String>,
  pub required_matches:    Vec<MatchField>,
  pub preferred_matches:   Vec<MatchField>,
  pub max_age_days:        u32,
  pub preferred_age_days:  u32,
  pub weights:             FeatureWeights,
}

/// Build search parameters. A dominant size weight drops the room-count
/// constraint; a minor feature weight drops feature filtering.
pub fn enhance(
  property: &Property,
  criteria: &SelectionCriteria,
  weights: &FeatureWeights,
  learned: bool,
) -> EnhancedCriteria {
  let size_dominates = weights.size > SIZE_WEIGHT_DOMINANT;
  let features_minor = weights.features < FEATURE_WEIGHT_MINOR;
  let keep = |f: &MatchField| {
    !(size_dominates && matches!(f, MatchField::Bedrooms | MatchField::Bathrooms)
      || features_minor && *f == MatchField::Features)
  };
  let area = property.area_m2.filter(|a| *a > 0.0);

  EnhancedCriteria {
    learned,
    property_type: property.property_type,
    max_distance_km: criteria.max_distance_km,
    optimal_distance_km: criteria.optimal_distance_km,
    min_area_m2: area.map(|a| a * criteria.area_ratio_min),
    max_area_m2: area.map(|a| a * criteria.area_ratio_max),
    bedrooms: property.bedrooms.filter(|_| !size_dominates),
    bathrooms: property.bathrooms.filter(|_| !size_dominates),
    required_features: if features_minor {
      Vec::new()
    } else {
      property.features.iter().map(|f| normalize_name(f)).collect()
    },
    required_matches: criteria.required_matches.iter().copied().filter(keep).collect(),
    preferred_matches: criteria.preferred_matches.iter().copied().filter(keep).collect(),
    max_age_days: criteria.max_comparable_age_days,
    preferred_age_days: criteria.preferred_comparable_age_days,
    weights: weights.clone(),
  }
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedComparable {
  pub address:  String,
  /// Weighted similarity, 0–100.
  pub score:    f64,
  pub location: f64,
  pub size:     Option<f64>,
  pub recency:  Option<f64>,
  pub features: Option<f64>,
}

fn feature_overlap(a: &[String], b: &[String]) -> Option<f64> {
  let a: BTreeSet<String> = a.iter().map(|f| normalize_name(f)).collect();
  let b: BTreeSet<String> = b.iter().map(|f| normalize_name(f)).collect();
  let union = a.union(&b).count();
  (union > 0).then(|| a.intersection(&b).count() as f64 / union as f64)
}

/// Score one comparable against the subject on every dimension known.
pub fn rank(
  property: &Property,
  comparable: &Comparable,
  criteria: &SelectionCriteria,
  weights: &FeatureWeights,
) -> RankedComparable {
  let location = (1.0 - comparable.distance_km / criteria.max_distance_km).clamp(0.0, 1.0);
  let size = property
    .area_m2
    .filter(|a| *a > 0.0 && comparable.area_m2 > 0.0)
    .map(|a| (1.0 - (comparable.area_m2 / a - 1.0).abs()).max(0.0));
  let recency = comparable.age_days.map(|d| {
    (1.0 - f64::from(d) / f64::from(criteria.max_comparable_age_days.max(1))).max(0.0)
  });
  let features = feature_overlap(&property.features, &comparable.features);

  let mut weighted = weights.location * location;
  let mut total = weights.location;
  for (weight, sim) in [(weights.size, size), (weights.recency, recency), (weights.features, features)] {
    if let Some(s) = sim {
      weighted += weight * s;
      total += weight;
    }
  }
  let score = if total > 0.0 { weighted / total * 100.0 } else { 0.0 };

  RankedComparable {
    address: comparable.address.clone(),
    score,
    location,
    size,
    recency,
    features,
  }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparableSummary {
  pub segments:           usize,
  pub learned_segments:   usize,
  pub average_confidence: Option<f64>,
  pub total_analyses:     u64,
  pub total_feedback:     u64,
  /// Most used success patterns across every segment.
  pub top_patterns:       Vec<SuccessPattern>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

fn pattern_name(property_type: PropertyType, avg_distance_km: f64, spread: f64) -> String {
  let radius = match avg_distance_km {
    d if d < 0.5 => "close",
    d if d < 1.5 => "near",
    _ => "wide",
  };
  let band = match spread {
    s if s <= 0.15 => "tight",
    s if s <= 0.3 => "moderate",
    _ => "loose",
  };
  format!("{property_type}:{radius}:{band}")
}

/// Largest relative size difference among the comparables.
fn area_ratio_spread(property: &Property, comparables: &[Comparable]) -> Option<f64> {
  let area = property.area_m2.filter(|a| *a > 0.0)?;
  comparables
    .iter()
    .filter(|c| c.area_m2 > 0.0)
    .map(|c| (c.area_m2 / area - 1.0).abs())
    .reduce(f64::max)
}

pub struct ComparableSelectionEngine<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> ComparableSelectionEngine<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  pub async fn intelligence(
    &self,
    region: &str,
    property_type: PropertyType,
  ) -> Option<ComparableIntelligence> {
    self
      .knowledge
      .load(&ComparableIntelligence::key_for(region, property_type))
      .await
  }

  async fn trusted(&self, region: &str, property_type: PropertyType) -> Option<ComparableIntelligence> {
    self
      .intelligence(region, property_type)
      .await
      .filter(|ci| ci.learning_confidence > self.config.comparable_confidence_floor)
  }

  pub async fn optimal_criteria(
    &self,
    region: &str,
    property_type: PropertyType,
  ) -> Resolved<SelectionCriteria> {
    match self.trusted(region, property_type).await {
      Some(ci) => Resolved::Learned(ci.criteria),
      None => Resolved::Default(SelectionCriteria::default_for(property_type)),
    }
  }

  pub async fn feature_weights(
    &self,
    region: &str,
    property_type: PropertyType,
  ) -> Resolved<FeatureWeights> {
    match self.trusted(region, property_type).await {
      Some(ci) => Resolved::Learned(ci.weights),
      None => Resolved::Default(FeatureWeights::default_for(property_type)),
    }
  }

  /// Track the segment's €/m² and how consistently analyses agree with it.
  pub async fn learn_from_analysis(
    &self,
    report: &Report,
    now: DateTime<Utc>,
  ) -> Option<ComparableIntelligence> {
    let region = report.property.city.clone();
    let property_type = report.property.property_type;
    let observed = report.price_per_m2();
    let stated_confidence = report.valuation.map(|v| v.confidence);
    let mean_distance = mean(
      &report
        .comparables
        .iter()
        .map(|c| c.distance_km)
        .collect::<Vec<_>>(),
    );

    let init_region = region.clone();
    let updated = self
      .knowledge
      .modify(
        ComparableIntelligence::key_for(&region, property_type),
        move || ComparableIntelligence::new(&init_region, property_type, now),
        move |ci: &mut ComparableIntelligence| {
          if let Some(x) = observed {
            if ci.analyses > 0 && ci.observed_price_per_m2 > 0.0 {
              let consistency = consistency_score(x, ci.observed_price_per_m2);
              ci.selection_accuracy = ema(ci.selection_accuracy, consistency, COMPARABLE_ALPHA);
            }
            ci.observed_price_per_m2 = running_mean(ci.observed_price_per_m2, ci.analyses, x);
          }
          if let Some(c) = stated_confidence {
            ci.valuation_accuracy = ema(ci.valuation_accuracy, c, COMPARABLE_ALPHA);
          }
          if let Some(d) = mean_distance {
            ci.criteria.optimal_distance_km = ema(ci.criteria.optimal_distance_km, d, COMPARABLE_ALPHA);
          }
          ci.analyses += 1;
          settle(ci, now);
        },
      )
      .await?;

    tracing::debug!(
      segment = %updated.key(),
      analyses = updated.analyses,
      confidence = updated.learning_confidence,
      "comparable intelligence updated"
    );
    Some(updated)
  }

  /// Learn from a user's verdict on the comparables a report used.
  pub async fn learn_from_feedback(
    &self,
    property: &Property,
    comparables: &[Comparable],
    feedback: &Feedback,
    now: DateTime<Utc>,
  ) -> Option<ComparableIntelligence> {
    let (rating, accuracy) = feedback
      .component(Component::Comparables)
      .map_or((feedback.overall_rating, feedback.overall_rating), |r| {
        (r.rating, r.accuracy)
      });
    let success = rating >= 4 && accuracy >= 4;
    let failure = rating <= 2;

    let avg_distance = mean(&comparables.iter().map(|c| c.distance_km).collect::<Vec<_>>());
    let spread = area_ratio_spread(property, comparables);
    let property_type = property.property_type;
    let pattern = avg_distance.map(|d| pattern_name(property_type, d, spread.unwrap_or(0.0)));
    let rules = if failure { matching_rules(&feedback.comment_text()) } else { Vec::new() };
    let comparable_count = comparables.len();

    let region = property.city.clone();
    let init_region = region.clone();
    let (update_pattern, update_rules) = (pattern.clone(), rules.clone());
    let updated = self
      .knowledge
      .modify(
        ComparableIntelligence::key_for(&region, property_type),
        move || ComparableIntelligence::new(&init_region, property_type, now),
        move |ci: &mut ComparableIntelligence| {
          ci.feedback_count += 1;
          ci.selection_accuracy =
            ema(ci.selection_accuracy, f64::from(accuracy) * 20.0, COMPARABLE_ALPHA);

          if success && let Some(d) = avg_distance {
            ci.criteria.optimal_distance_km = ema(ci.criteria.optimal_distance_km, d, COMPARABLE_ALPHA);
            if let Some(s) = spread {
              let c = &mut ci.criteria;
              let (target_min, target_max) = (1.0 - s, 1.0 + s);
              if target_min > c.area_ratio_min {
                c.area_ratio_min = ema(c.area_ratio_min, target_min, COMPARABLE_ALPHA);
              }
              if target_max < c.area_ratio_max {
                c.area_ratio_max = ema(c.area_ratio_max, target_max, COMPARABLE_ALPHA);
              }
            }
          }

          if let Some(name) = &update_pattern {
            let outcome = if success { 1.0 } else { 0.0 };
            match ci.success_patterns.iter_mut().find(|p| &p.name == name) {
              Some(p) if success || failure => {
                p.success_rate = running_mean(p.success_rate, p.use_count, outcome);
                p.use_count += 1;
                p.last_used = now;
              }
              None if success => {
                ci.success_patterns.push(SuccessPattern {
                  name:              name.clone(),
                  avg_distance_km:   avg_distance.unwrap_or(0.0),
                  area_ratio_spread: spread.unwrap_or(0.0),
                  comparable_count,
                  use_count:         1,
                  success_rate:      1.0,
                  last_used:         now,
                });
              }
              _ => {}
            }
          }

          for rule in &update_rules {
            (rule.apply)(ci);
          }
          settle(ci, now);
        },
      )
      .await?;

    if success {
      tracing::info!(
        segment = %updated.key(),
        pattern = pattern.as_deref().unwrap_or("-"),
        "comparable success pattern recorded"
      );
    }
    for rule in &rules {
      tracing::info!(segment = %updated.key(), rule = rule.name, "comment rule applied");
    }
    Some(updated)
  }

  /// Move valuation accuracy toward a validated prediction's accuracy.
  pub async fn learn_from_validation(
    &self,
    prediction: &Prediction,
    validation: &PredictionValidation,
    now: DateTime<Utc>,
  ) -> Option<ComparableIntelligence> {
    let accuracy = validation.overall_accuracy;
    self
      .knowledge
      .modify_existing(
        ComparableIntelligence::key_for(&prediction.region, prediction.property_type),
        move |ci: &mut ComparableIntelligence| {
          ci.valuation_accuracy = ema(ci.valuation_accuracy, accuracy, COMPARABLE_ALPHA);
          settle(ci, now);
        },
      )
      .await
  }

  pub async fn generate_enhanced_criteria(&self, property: &Property) -> EnhancedCriteria {
    let criteria = self.optimal_criteria(&property.city, property.property_type).await;
    let weights = self.feature_weights(&property.city, property.property_type).await;
    enhance(property, criteria.value(), weights.value(), criteria.is_learned())
  }

  /// Comparables ordered by weighted similarity to `property`, best first.
  pub async fn rank_comparables(
    &self,
    property: &Property,
    comparables: &[Comparable],
  ) -> Vec<RankedComparable> {
    let criteria = self.optimal_criteria(&property.city, property.property_type).await;
    let weights = self.feature_weights(&property.city, property.property_type).await;
    let mut ranked: Vec<RankedComparable> = comparables
      .iter()
      .map(|c| rank(property, c, criteria.value(), weights.value()))
      .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
  }

  pub async fn summary(&self) -> ComparableSummary {
    let segments: Vec<ComparableIntelligence> = self.knowledge.all().await;
    let mut top_patterns: Vec<SuccessPattern> = segments
      .iter()
      .flat_map(|ci| ci.success_patterns.iter().cloned())
      .collect();
    top_patterns.sort_by(|a, b| b.use_count.cmp(&a.use_count).then_with(|| a.name.cmp(&b.name)));
    top_patterns.truncate(5);
    ComparableSummary {
      segments: segments.len(),
      learned_segments: segments
        .iter()
        .filter(|ci| ci.learning_confidence > self.config.comparable_confidence_floor)
        .count(),
      average_confidence: mean(
        &segments.iter().map(|ci| ci.learning_confidence).collect::<Vec<_>>(),
      ),
      total_analyses: segments.iter().map(|ci| u64::from(ci.analyses)).sum(),
      total_feedback: segments.iter().map(|ci| u64::from(ci.feedback_count)).sum(),
      top_patterns,
    }
  }
}
