//! ProgressiveDeepening: each repeated analysis of the same property may
//! climb one rung of a fixed ladder of analysis depth.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tasa_core::{
  feedback::Feedback,
  history::{AnalysisHistory, FeedbackSummary, MAX_HISTORY_ENTRIES, QUALITY_WINDOW},
  report::{Property, Report},
  stats::mean,
  store::KnowledgeStore,
};

use crate::{config::LearningConfig, knowledge::Knowledge};

/// Last analysis quality must exceed this before climbing.
const UPGRADE_QUALITY: f64 = 80.0;
/// Last feedback, when present, must exceed this before climbing.
const UPGRADE_FEEDBACK: f64 = 3.5;

// ─── Ladder ──────────────────────────────────────────────────────────────────

/// Performance recorded for a level before any local history existed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoricalPerformance {
  pub average_quality:   f64,
  pub user_satisfaction: f64,
  pub accuracy:          f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressiveLevel {
  pub level:                 u8,
  pub name:                  &'static str,
  pub focus_areas:           &'static [&'static str],
  pub data_requirements:     &'static [&'static str],
  pub expected_improvements: &'static [&'static str],
  pub historical:            HistoricalPerformance,
}

pub static LADDER: [ProgressiveLevel; 4] = [
  ProgressiveLevel {
    level:                 1,
    name:                  "baseline",
    focus_areas:           &["valuation", "comparable sales", "market trend"],
    data_requirements:     &["address", "property type", "built area"],
    expected_improvements: &["reliable price range from nearby sales"],
    historical:            HistoricalPerformance {
      average_quality:   68.0,
      user_satisfaction: 3.6,
      accuracy:          72.0,
    },
  },
  ProgressiveLevel {
    level:                 2,
    name:                  "neighbourhood",
    focus_areas:           &["amenities", "schools", "transport links", "street-level pricing"],
    data_requirements:     &["coordinates", "amenity listings"],
    expected_improvements: &[
      "location premium explained by nearby amenities",
      "tighter comparable radius",
    ],
    historical:            HistoricalPerformance {
      average_quality:   74.0,
      user_satisfaction: 3.9,
      accuracy:          77.0,
    },
  },
  ProgressiveLevel {
    level:                 3,
    name:                  "investment",
    focus_areas:           &["rental yield", "future developments", "seasonal demand"],
    data_requirements:     &["rental listings", "planning applications"],
    expected_improvements: &[
      "yield and appreciation outlook",
      "development impact on price",
    ],
    historical:            HistoricalPerformance {
      average_quality:   79.0,
      user_satisfaction: 4.1,
      accuracy:          80.0,
    },
  },
  ProgressiveLevel {
    level:                 4,
    name:                  "expert",
    focus_areas:           &[
      "micro-market dynamics",
      "price history of the building",
      "regulatory risk",
      "exit strategy",
    ],
    data_requirements:     &["transaction history", "land registry extracts"],
    expected_improvements: &[
      "property-specific risk profile",
      "negotiation range backed by transaction history",
    ],
    historical:            HistoricalPerformance {
      average_quality:   84.0,
      user_satisfaction: 4.3,
      accuracy:          83.0,
    },
  },
];

pub const MAX_LEVEL: u8 = 4;

/// The ladder rung for `level`, clamped into range.
pub fn level(level: u8) -> &'static ProgressiveLevel {
  let index = usize::from(level.clamp(1, MAX_LEVEL)) - 1;
  &LADDER[index]
}

/// Whether the next analysis of a property may run one level deeper.
pub fn upgrade_allowed(
  history: &AnalysisHistory,
  last_feedback: Option<f64>,
  now: DateTime<Utc>,
  min_interval: Duration,
) -> bool {
  history.current_level < MAX_LEVEL
    && history.last_quality().is_some_and(|q| q > UPGRADE_QUALITY)
    && last_feedback.is_none_or(|r| r > UPGRADE_FEEDBACK)
    && now - history.last_analyzed > min_interval
}

fn last_feedback_rating(history: &AnalysisHistory) -> Option<f64> {
  history.last_feedback().map(|f| f64::from(f.rating))
}

// ─── Outbound shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeepeningStrategy {
  pub property_id:           String,
  pub analysis_count:        u32,
  pub current_level:         u8,
  pub next_level:            u8,
  pub level_name:            &'static str,
  pub focus_areas:           Vec<&'static str>,
  /// Focus areas the next level adds over the current one.
  pub added_focus_areas:     Vec<&'static str>,
  pub data_requirements:     Vec<&'static str>,
  pub search_queries:        Vec<String>,
  pub expected_improvements: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelMetrics {
  pub level:           u8,
  pub name:            &'static str,
  pub properties:      usize,
  pub average_quality: Option<f64>,
  pub historical:      HistoricalPerformance,
}

// ─── Component ───────────────────────────────────────────────────────────────

pub struct ProgressiveDeepening<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> ProgressiveDeepening<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  pub async fn history(&self, property_id: &str) -> Option<AnalysisHistory> {
    self.knowledge.load(property_id).await
  }

  pub fn should_upgrade_level(
    &self,
    history: &AnalysisHistory,
    last_feedback: Option<f64>,
    now: DateTime<Utc>,
  ) -> bool {
    upgrade_allowed(history, last_feedback, now, self.config.deepening_min_interval())
  }

  /// Record one analysis, climbing a level first when allowed.
  pub async fn record_analysis(
    &self,
    report: &Report,
    quality: f64,
    prompt_versions: Vec<String>,
    now: DateTime<Utc>,
  ) -> Option<AnalysisHistory> {
    let p = &report.property;
    let property_id = p.identity();
    let (init_id, address, city, province) =
      (property_id.clone(), p.address.clone(), p.city.clone(), p.province.clone());
    let min_interval = self.config.deepening_min_interval();

    self
      .knowledge
      .modify(
        property_id,
        move || AnalysisHistory::new(init_id, &address, &city, &province, now),
        move |h: &mut AnalysisHistory| {
          if h.analysis_count > 0
            && upgrade_allowed(h, last_feedback_rating(h), now, min_interval)
          {
            h.current_level += 1;
            tracing::info!(
              property_id = %h.property_id,
              level = h.current_level,
              "analysis depth upgraded"
            );
          }
          h.analysis_count += 1;
          AnalysisHistory::push_bounded(&mut h.quality_scores, quality, QUALITY_WINDOW);
          for version in prompt_versions {
            if !h.prompt_versions.contains(&version) {
              AnalysisHistory::push_bounded(&mut h.prompt_versions, version, MAX_HISTORY_ENTRIES);
            }
          }
          h.last_analyzed = now;
        },
      )
      .await
  }

  /// What the next analysis of `property` should focus on.
  pub async fn deepening_strategy(
    &self,
    property: &Property,
    now: DateTime<Utc>,
  ) -> DeepeningStrategy {
    let property_id = property.identity();
    let history = self.history(&property_id).await;
    let (analysis_count, current, next) = match &history {
      None => (0, 0, 1),
      Some(h) if self.should_upgrade_level(h, last_feedback_rating(h), now) => {
        (h.analysis_count, h.current_level, h.current_level + 1)
      }
      Some(h) => (h.analysis_count, h.current_level, h.current_level),
    };

    let rung = level(next);
    let previous: &[&str] = if current == 0 || current == next {
      &[]
    } else {
      level(current).focus_areas
    };
    let added_focus_areas = if current == next {
      Vec::new()
    } else {
      rung
        .focus_areas
        .iter()
        .copied()
        .filter(|f| !previous.contains(f))
        .collect()
    };

    let location = match property.neighborhood.as_deref().map(str::trim) {
      Some(n) if !n.is_empty() => format!("{n}, {}", property.city.trim()),
      _ => format!("{}, {}", property.city.trim(), property.province.trim()),
    };
    let search_queries = rung
      .focus_areas
      .iter()
      .map(|f| format!("{f} {} {location}", property.property_type))
      .collect();

    DeepeningStrategy {
      property_id,
      analysis_count,
      current_level: current,
      next_level: next,
      level_name: rung.name,
      focus_areas: rung.focus_areas.to_vec(),
      added_focus_areas,
      data_requirements: rung.data_requirements.to_vec(),
      search_queries,
      expected_improvements: rung.expected_improvements.to_vec(),
    }
  }

  /// Attach a feedback summary to a property's history, if one exists.
  pub async fn attach_feedback(
    &self,
    property_id: &str,
    feedback: &Feedback,
  ) -> Option<AnalysisHistory> {
    let summary = FeedbackSummary {
      feedback_id:  feedback.feedback_id,
      rating:       feedback.overall_rating,
      submitted_at: feedback.submitted_at,
    };
    self
      .knowledge
      .modify_existing(property_id.to_string(), move |h: &mut AnalysisHistory| {
        if h.feedback.iter().all(|f| f.feedback_id != summary.feedback_id) {
          AnalysisHistory::push_bounded(&mut h.feedback, summary, MAX_HISTORY_ENTRIES);
        }
      })
      .await
  }

  /// Rolling quality of the properties currently at each level.
  pub async fn level_metrics(&self) -> Vec<LevelMetrics> {
    let histories: Vec<AnalysisHistory> = self.knowledge.all().await;
    LADDER
      .iter()
      .map(|rung| {
        let at_level: Vec<&AnalysisHistory> =
          histories.iter().filter(|h| h.current_level == rung.level).collect();
        let scores: Vec<f64> = at_level
          .iter()
          .flat_map(|h| h.quality_scores.iter().copied())
          .collect();
        LevelMetrics {
          level:           rung.level,
          name:            rung.name,
          properties:      at_level.len(),
          average_quality: mean(&scores),
          historical:      rung.historical,
        }
      })
      .collect()
  }
}
