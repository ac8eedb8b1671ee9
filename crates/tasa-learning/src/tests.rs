//! End-to-end scenarios through [`LearningOrchestrator`] over an in-memory
//! store.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use tasa_core::{
  Resolved,
  feedback::{Component, ComponentRating, Feedback, OutcomeVerification},
  memory::MemoryStore,
  prompt::{Arm, PromptCategory},
  region::{Granularity, RegionKey},
  report::{Comparable, MarketTrend, Property, PromptUsage, Report, Trend, Valuation},
};

use tasa_store_sqlite::SqliteStore;

use crate::{FeedbackProcessing, LearningConfig, LearningOrchestrator};

fn orchestrator() -> LearningOrchestrator<MemoryStore> {
  LearningOrchestrator::new(Arc::new(MemoryStore::new()), LearningConfig::default())
}

fn malaga_report(generated_at: DateTime<Utc>) -> Report {
  Report {
    session_id:       "session-1".into(),
    property:         Property {
      address: "Calle Larios 5, 29005 Málaga".into(),
      city: "Málaga".into(),
      province: "Málaga".into(),
      neighborhood: Some("Centro".into()),
      area_m2: Some(100.0),
      bedrooms: Some(3),
      bathrooms: Some(2),
      ..Property::default()
    },
    valuation:        Some(Valuation {
      low:          280_000.0,
      high:         320_000.0,
      estimated:    300_000.0,
      confidence:   80.0,
      monthly_rent: Some(1_200.0),
    }),
    market_trend:     Some(MarketTrend {
      direction:         Trend::Rising,
      yearly_change_pct: 6.0,
      days_on_market:    Some(45.0),
    }),
    comparables:      vec![
      Comparable {
        address: "Calle Granada 1".into(),
        price: 290_000.0,
        area_m2: 95.0,
        distance_km: 0.4,
        ..Comparable::default()
      },
      Comparable {
        address: "Calle Nueva 7".into(),
        price: 315_000.0,
        area_m2: 105.0,
        distance_km: 0.7,
        ..Comparable::default()
      },
    ],
    amenities:        Vec::new(),
    developments:     Vec::new(),
    summary:          "Well located flat in the historic centre.".into(),
    investment_grade: None,
    data_quality:     Some(80.0),
    methods:          vec!["comparables".into()],
    prompts:          Vec::new(),
    generated_at,
  }
}

fn city_key() -> RegionKey { RegionKey::new(Granularity::City, "Málaga") }

// ─── Analyses ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_analysis_seeds_regional_knowledge() {
  let o = orchestrator();
  let now = Utc::now();
  let report = malaga_report(now);

  let update = o.update_regional_knowledge(&report, Some(75.0), now).await;
  assert!(update.regions_updated >= 1);
  assert!(update.prediction_id.is_some());

  let k = o.regional().knowledge_for(&city_key()).await.unwrap();
  assert_eq!(k.data_points, 1);
  assert!((k.market.average_price_per_m2 - 3000.0).abs() < 1e-9);
  assert!(k.confidence <= 50.0);

  // One data point is not enough to forecast.
  assert!(o.predict_property_performance(&report.property, None).await.is_none());
}

#[tokio::test]
async fn low_quality_analysis_is_not_learned() {
  let o = orchestrator();
  let now = Utc::now();
  let update = o.update_regional_knowledge(&malaga_report(now), Some(10.0), now).await;
  assert_eq!(update.regions_updated, 0);
  assert!(o.regional().knowledge_for(&city_key()).await.is_none());
}

#[tokio::test]
async fn consistent_analyses_graduate_comparable_criteria() {
  let o = orchestrator();
  let now = Utc::now();
  let report = malaga_report(now);
  let property_type = report.property.property_type;

  o.update_regional_knowledge(&report, Some(75.0), now).await;
  let criteria = o.optimal_comparable_criteria("Málaga", property_type).await;
  assert!(!criteria.is_learned());

  for _ in 0..5 {
    o.update_regional_knowledge(&report, Some(75.0), now).await;
  }
  let criteria = o.optimal_comparable_criteria("Málaga", property_type).await;
  assert!(matches!(criteria, Resolved::Learned(_)));
}

#[tokio::test]
async fn concurrent_analyses_are_all_counted() {
  let o = Arc::new(orchestrator());
  let now = Utc::now();
  let n: u32 = 16;

  let handles: Vec<_> = (0..n)
    .map(|_| {
      let o = Arc::clone(&o);
      tokio::spawn(async move {
        o.update_regional_knowledge(&malaga_report(now), Some(75.0), now).await;
      })
    })
    .collect();
  for h in handles {
    h.await.unwrap();
  }

  let k = o.regional().knowledge_for(&city_key()).await.unwrap();
  assert_eq!(k.data_points, n);
  let history = o
    .deepening()
    .history(&malaga_report(now).property.identity())
    .await
    .unwrap();
  assert_eq!(history.analysis_count, n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_learning_over_sqlite_loses_nothing() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let o = Arc::new(LearningOrchestrator::new(Arc::new(store), LearningConfig::default()));
  let now = Utc::now();
  let n: u32 = 32;

  let handles: Vec<_> = (0..n)
    .map(|_| {
      let o = Arc::clone(&o);
      tokio::spawn(async move {
        let areas: BTreeSet<String> = ["alpha", "beta"].map(String::from).into();
        o.locations().observe_cluster(areas, None, now).await;
        o.update_regional_knowledge(&malaga_report(now), Some(75.0), now).await;
      })
    })
    .collect();
  for h in handles {
    h.await.unwrap();
  }

  let cluster = o.locations().cluster_for("alpha").await.unwrap();
  assert_eq!(cluster.observations, n);
  let k = o.regional().knowledge_for(&city_key()).await.unwrap();
  assert_eq!(k.data_points, n);
}

// ─── Feedback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_feedback_is_rejected_and_not_stored() {
  let o = orchestrator();
  let outcome = o
    .process_user_feedback(&Feedback::new("session-1", 7), None, Utc::now())
    .await;
  assert!(matches!(outcome, FeedbackProcessing::Rejected { .. }));
  assert!(o.feedback().all().await.is_empty());
}

#[tokio::test]
async fn low_rated_component_optimizes_its_prompts() {
  let o = orchestrator();
  let now = Utc::now();
  let template = "Estimate the value of {address}.";
  for _ in 0..6 {
    o.prompts()
      .record_usage(
        &PromptUsage {
          category:   PromptCategory::Valuation,
          template:   template.into(),
          latency_ms: 2_000.0,
          cost:       0.01,
          success:    false,
          quality:    Some(2.0),
        },
        now,
      )
      .await;
  }

  let mut fb = Feedback::new("session-1", 2);
  fb.components.insert(Component::Valuation, ComponentRating {
    rating:     1,
    accuracy:   1,
    usefulness: 2,
    comment:    None,
  });

  match o.process_user_feedback(&fb, None, now).await {
    FeedbackProcessing::Accepted { low_rated, optimizations, .. } => {
      assert_eq!(low_rated, vec![Component::Valuation]);
      assert_eq!(optimizations.len(), 1);
    }
    other => panic!("unexpected {other:?}"),
  }
  assert_eq!(o.feedback().all().await.len(), 1);
}

#[tokio::test]
async fn feedback_with_report_reaches_history() {
  let o = orchestrator();
  let now = Utc::now();
  let report = malaga_report(now);
  o.update_regional_knowledge(&report, Some(75.0), now).await;

  let outcome = o
    .process_user_feedback(&Feedback::new("session-1", 5), Some(&report), now)
    .await;
  let FeedbackProcessing::Accepted { history_updated, .. } = outcome else {
    panic!("feedback rejected");
  };
  assert!(history_updated);

  let history = o.deepening().history(&report.property.identity()).await.unwrap();
  assert_eq!(history.last_feedback().map(|f| f.rating), Some(5));
}

// ─── Predictions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn verified_sale_validates_prediction() {
  let o = orchestrator();
  let now = Utc::now();
  let then = now - Duration::days(45);
  let report = malaga_report(then);
  o.update_regional_knowledge(&report, Some(75.0), then).await;

  let mut fb = Feedback::new("session-1", 4);
  fb.property_id = Some(report.property.identity());
  fb.outcome = Some(OutcomeVerification {
    actual_sale_price:  Some(330_000.0),
    actual_sale_date:   None,
    investment_outcome: None,
    trend_accurate:     Some(true),
    verified_at:        now - Duration::days(1),
  });
  o.process_user_feedback(&fb, None, now).await;

  let run = o.validate_predictions(&o.feedback_outcomes(), now).await;
  assert_eq!(run.examined, 1);
  assert_eq!(run.validated.len(), 1);
  assert!((run.validated[0].price_accuracy - 90.909).abs() < 0.01);

  // Already validated predictions are not examined again.
  let again = o.validate_predictions(&o.feedback_outcomes(), now).await;
  assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn young_predictions_are_not_validated() {
  let o = orchestrator();
  let now = Utc::now();
  o.update_regional_knowledge(&malaga_report(now), Some(75.0), now).await;
  let run = o.validate_predictions(&crate::NoOutcomes, now).await;
  assert_eq!(run.examined, 0);
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn small_ab_test_is_not_significant() {
  let o = orchestrator();
  let now = Utc::now();
  let test = o
    .prompts()
    .start_ab_test(PromptCategory::Summary, "Summarise.", "Summarise briefly.", 14, now)
    .await;
  for i in 0..25 {
    o.prompts().record_ab_usage(test.test_id, Arm::A, i % 5 != 0, Some(4.0), now).await;
    o.prompts().record_ab_usage(test.test_id, Arm::B, i % 2 == 0, Some(3.0), now).await;
  }

  let result = o.prompts().evaluate_ab_test(test.test_id, now).await.unwrap();
  assert!(!result.statistically_significant);
  assert_eq!(result.winner, None);
}

// ─── Reporting ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_system_has_no_recommendations() {
  let o = orchestrator();
  assert!(o.system_recommendations().await.is_empty());

  let report = o.generate_learning_report(Utc::now()).await;
  assert_eq!(report.feedback.total_feedback, 0);
  assert_eq!(report.predictions.total_predictions, 0);
  assert_eq!(report.regional.regions, 0);
  assert!(report.recommendations.is_empty());
}

#[tokio::test]
async fn unvalidated_predictions_are_flagged() {
  let o = orchestrator();
  let now = Utc::now();
  o.update_regional_knowledge(&malaga_report(now), Some(75.0), now).await;

  let report = o.generate_learning_report(now).await;
  assert_eq!(report.predictions.total_predictions, 1);
  assert!(
    report
      .recommendations
      .iter()
      .any(|r| r.area == crate::orchestrator::RecommendationArea::Predictions)
  );
}
