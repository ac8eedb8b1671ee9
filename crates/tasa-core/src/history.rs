//! Per-property analysis history driving progressive deepening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Collection, Record};

/// Bound on the retained quality-score window.
pub const QUALITY_WINDOW: usize = 20;

/// Bound on the retained prompt versions and feedback summaries.
pub const MAX_HISTORY_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
  pub feedback_id:  Uuid,
  pub rating:       u8,
  pub submitted_at: DateTime<Utc>,
}

/// Everything known about repeated analyses of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisHistory {
  pub property_id:     String,
  pub address:         String,
  pub city:            String,
  pub province:        String,
  pub analysis_count:  u32,
  /// Deepening level the most recent analysis ran at, starting at 1.
  pub current_level:   u8,
  /// Most recent last, bounded by [`QUALITY_WINDOW`].
  pub quality_scores:  Vec<f64>,
  pub prompt_versions: Vec<String>,
  pub feedback:        Vec<FeedbackSummary>,
  pub first_analyzed:  DateTime<Utc>,
  pub last_analyzed:   DateTime<Utc>,
}

impl AnalysisHistory {
  pub fn new(
    property_id: String,
    address: &str,
    city: &str,
    province: &str,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      property_id,
      address: address.to_string(),
      city: city.to_string(),
      province: province.to_string(),
      analysis_count: 0,
      current_level: 1,
      quality_scores: Vec::new(),
      prompt_versions: Vec::new(),
      feedback: Vec::new(),
      first_analyzed: now,
      last_analyzed: now,
    }
  }

  pub fn last_quality(&self) -> Option<f64> { self.quality_scores.last().copied() }

  pub fn last_feedback(&self) -> Option<&FeedbackSummary> { self.feedback.last() }

  /// Append to a bounded window, dropping the oldest entries.
  pub fn push_bounded<T>(items: &mut Vec<T>, item: T, bound: usize) {
    items.push(item);
    if items.len() > bound {
      let excess = items.len() - bound;
      items.drain(..excess);
    }
  }
}

impl Record for AnalysisHistory {
  const COLLECTION: Collection = Collection::AnalysisHistory;

  fn key(&self) -> String { self.property_id.clone() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bounded_window_drops_oldest() {
    let mut v = Vec::new();
    for i in 0..25 {
      AnalysisHistory::push_bounded(&mut v, i, QUALITY_WINDOW);
    }
    assert_eq!(v.len(), QUALITY_WINDOW);
    assert_eq!(v[0], 5);
    assert_eq!(*v.last().unwrap(), 24);
  }
}
