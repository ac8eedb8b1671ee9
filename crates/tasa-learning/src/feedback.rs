//! FeedbackStore: persisted user ratings and aggregate satisfaction.

use std::collections::BTreeMap;

use serde::Serialize;
use strum::IntoEnumIterator as _;
use tasa_core::{
  feedback::{Component, Feedback, OutcomeVerification},
  stats::mean,
  store::KnowledgeStore,
};
use uuid::Uuid;

use crate::knowledge::Knowledge;

/// Size of each window compared by the satisfaction trend.
const TREND_WINDOW: usize = 10;
const MIN_TREND_WINDOW: usize = 3;
const TREND_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionTrend {
  Improving,
  Declining,
  Stable,
  InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentAverages {
  pub count:      usize,
  pub rating:     f64,
  pub accuracy:   f64,
  pub usefulness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatisfactionMetrics {
  pub total_feedback:       usize,
  pub average_rating:       Option<f64>,
  /// Overall rating (1–5) → count.
  pub rating_distribution:  BTreeMap<u8, usize>,
  pub components:           BTreeMap<Component, ComponentAverages>,
  /// Components whose average rating is below 3.
  pub weak_components:      Vec<Component>,
  /// Corrected field name → number of corrections.
  pub corrected_fields:     BTreeMap<String, usize>,
  pub with_outcome:         usize,
  pub trend:                SatisfactionTrend,
}

/// Compare the most recent window of overall ratings with the one before.
/// `ratings` must be oldest first.
pub fn satisfaction_trend(ratings: &[f64]) -> SatisfactionTrend {
  let window = (ratings.len() / 2).min(TREND_WINDOW);
  if window < MIN_TREND_WINDOW {
    return SatisfactionTrend::InsufficientData;
  }
  let end = ratings.len();
  let recent = &ratings[end - window..];
  let previous = &ratings[end - 2 * window..end - window];
  match (mean(recent), mean(previous)) {
    (Some(r), Some(p)) if r - p > TREND_THRESHOLD => SatisfactionTrend::Improving,
    (Some(r), Some(p)) if p - r > TREND_THRESHOLD => SatisfactionTrend::Declining,
    _ => SatisfactionTrend::Stable,
  }
}

pub struct FeedbackStore<S> {
  knowledge: Knowledge<S>,
}

impl<S: KnowledgeStore> FeedbackStore<S> {
  pub fn new(knowledge: Knowledge<S>) -> Self { Self { knowledge } }

  /// Validate and persist. Invalid ratings are rejected before any write.
  pub async fn submit(&self, feedback: &Feedback) -> tasa_core::Result<()> {
    feedback.validate()?;
    if self.knowledge.save(feedback).await {
      tracing::debug!(feedback_id = %feedback.feedback_id, "feedback stored");
    }
    Ok(())
  }

  pub async fn get(&self, feedback_id: Uuid) -> Option<Feedback> {
    self.knowledge.load(&feedback_id.to_string()).await
  }

  pub async fn all(&self) -> Vec<Feedback> { self.knowledge.all().await }

  pub async fn for_session(&self, session_id: &str) -> Vec<Feedback> {
    let mut found: Vec<Feedback> = self
      .all()
      .await
      .into_iter()
      .filter(|f| f.session_id == session_id)
      .collect();
    found.sort_by_key(|f| f.submitted_at);
    found
  }

  /// Attach a later-arriving outcome verification. Unknown ids are ignored.
  pub async fn attach_outcome(
    &self,
    feedback_id: Uuid,
    outcome: OutcomeVerification,
  ) -> Option<Feedback> {
    let updated = self
      .knowledge
      .modify_existing(feedback_id.to_string(), move |f: &mut Feedback| {
        f.outcome = Some(outcome);
      })
      .await;
    if updated.is_none() {
      tracing::debug!(%feedback_id, "outcome for unknown feedback ignored");
    }
    updated
  }

  pub async fn metrics(&self) -> SatisfactionMetrics {
    let mut all = self.all().await;
    all.sort_by_key(|f| f.submitted_at);
    summarize(&all)
  }
}

/// Aggregate `feedback`, which must be ordered oldest first.
pub fn summarize(feedback: &[Feedback]) -> SatisfactionMetrics {
  let ratings: Vec<f64> = feedback.iter().map(|f| f64::from(f.overall_rating)).collect();

  let mut rating_distribution = BTreeMap::new();
  for f in feedback {
    *rating_distribution.entry(f.overall_rating).or_insert(0) += 1;
  }

  let mut components = BTreeMap::new();
  for component in Component::iter() {
    let rated: Vec<_> = feedback.iter().filter_map(|f| f.component(component)).collect();
    if rated.is_empty() {
      continue;
    }
    let avg = |pick: fn(&tasa_core::feedback::ComponentRating) -> u8| {
      rated.iter().map(|r| f64::from(pick(r))).sum::<f64>() / rated.len() as f64
    };
    components.insert(component, ComponentAverages {
      count:      rated.len(),
      rating:     avg(|r| r.rating),
      accuracy:   avg(|r| r.accuracy),
      usefulness: avg(|r| r.usefulness),
    });
  }

  let weak_components = components
    .iter()
    .filter(|(_, a)| a.rating < 3.0)
    .map(|(c, _)| *c)
    .collect();

  let mut corrected_fields = BTreeMap::new();
  for c in feedback.iter().flat_map(|f| &f.corrections) {
    *corrected_fields.entry(c.field.clone()).or_insert(0) += 1;
  }

  SatisfactionMetrics {
    total_feedback: feedback.len(),
    average_rating: mean(&ratings),
    rating_distribution,
    components,
    weak_components,
    corrected_fields,
    with_outcome: feedback.iter().filter(|f| f.outcome.is_some()).count(),
    trend: satisfaction_trend(&ratings),
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, Utc};
  use tasa_core::{
    feedback::{ComponentRating, FieldCorrection},
    memory::MemoryStore,
  };

  use super::*;

  fn store() -> FeedbackStore<MemoryStore> {
    FeedbackStore::new(Knowledge::new(Arc::new(MemoryStore::new())))
  }

  #[tokio::test]
  async fn invalid_feedback_is_not_persisted() {
    let s = store();
    let mut fb = Feedback::new("s1", 4);
    fb.components.insert(Component::Summary, ComponentRating {
      rating:     6,
      accuracy:   3,
      usefulness: 3,
      comment:    None,
    });

    assert!(s.submit(&fb).await.is_err());
    assert!(s.all().await.is_empty());
  }

  #[tokio::test]
  async fn outcome_attaches_to_existing_feedback_only() {
    let s = store();
    let fb = Feedback::new("s1", 4);
    s.submit(&fb).await.unwrap();

    let outcome = OutcomeVerification {
      actual_sale_price:  Some(310_000.0),
      actual_sale_date:   None,
      investment_outcome: None,
      trend_accurate:     Some(true),
      verified_at:        Utc::now(),
    };
    assert!(s.attach_outcome(Uuid::new_v4(), outcome.clone()).await.is_none());

    let updated = s.attach_outcome(fb.feedback_id, outcome).await.unwrap();
    assert_eq!(updated.outcome.unwrap().actual_sale_price, Some(310_000.0));
    assert_eq!(s.for_session("s1").await.len(), 1);
  }

  #[tokio::test]
  async fn metrics_aggregate_components_and_corrections() {
    let s = store();
    let start = Utc::now() - Duration::days(30);
    for (i, rating) in [2u8, 2, 2, 4, 5, 5].into_iter().enumerate() {
      let mut fb = Feedback::new(format!("s{i}"), rating);
      fb.submitted_at = start + Duration::days(i as i64);
      fb.components.insert(Component::Comparables, ComponentRating {
        rating,
        accuracy: rating,
        usefulness: 3,
        comment: None,
      });
      fb.corrections.push(FieldCorrection {
        field:     "area_m2".into(),
        original:  "90".into(),
        corrected: "95".into(),
      });
      s.submit(&fb).await.unwrap();
    }

    let m = s.metrics().await;
    assert_eq!(m.total_feedback, 6);
    assert_eq!(m.rating_distribution.get(&2), Some(&3));
    assert_eq!(m.corrected_fields.get("area_m2"), Some(&6));
    assert_eq!(m.components[&Component::Comparables].count, 6);
    assert_eq!(m.trend, SatisfactionTrend::Improving);
    assert!(m.weak_components.is_empty());
  }

  #[test]
  fn trend_needs_two_full_windows() {
    assert_eq!(satisfaction_trend(&[1.0, 5.0, 5.0, 5.0]), SatisfactionTrend::InsufficientData);
    assert_eq!(satisfaction_trend(&[4.0; 8]), SatisfactionTrend::Stable);
    assert_eq!(
      satisfaction_trend(&[5.0, 5.0, 5.0, 2.0, 2.0, 2.0]),
      SatisfactionTrend::Declining
    );
  }
}
