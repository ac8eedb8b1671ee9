//! Prompt-template performance, rule-based optimizations and A/B tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::{
  identity::template_hash,
  store::{Collection, Record},
};

/// The pipeline stage a prompt template serves.
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
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PromptCategory {
  Valuation,
  MarketAnalysis,
  Comparables,
  Investment,
  Amenities,
  Developments,
  Summary,
}

/// Bound on retained rating history per template.
pub const MAX_RATING_HISTORY: usize = 50;

// ─── Performance ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPerformance {
  pub category:             PromptCategory,
  pub template_hash:        String,
  pub template:             String,
  pub version:              u32,
  /// Hash of the template this one was derived from, if any.
  pub derived_from:         Option<String>,
  pub use_count:            u32,
  pub success_count:        u32,
  /// 0–1.
  pub success_rate:         f64,
  /// Pipeline quality ratings on a 1–5 scale, most recent last.
  pub ratings:              Vec<f64>,
  pub average_quality:      f64,
  pub average_latency_ms:   f64,
  pub average_cost:         f64,
  /// User satisfaction on a 1–5 scale; zero until a user rates it.
  pub user_satisfaction:    f64,
  pub user_ratings:         u32,
  pub optimization_history: Vec<OptimizationRecord>,
  pub created_at:           DateTime<Utc>,
  pub last_used:            DateTime<Utc>,
}

impl PromptPerformance {
  pub fn new(
    category: PromptCategory,
    template: &str,
    version: u32,
    derived_from: Option<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      category,
      template_hash: template_hash(template),
      template: template.to_string(),
      version,
      derived_from,
      use_count: 0,
      success_count: 0,
      success_rate: 0.0,
      ratings: Vec::new(),
      average_quality: 0.0,
      average_latency_ms: 0.0,
      average_cost: 0.0,
      user_satisfaction: 0.0,
      user_ratings: 0,
      optimization_history: Vec::new(),
      created_at: now,
      last_used: now,
    }
  }

  pub fn key_for(category: PromptCategory, hash: &str) -> String {
    format!("{category}:{hash}")
  }
}

impl Record for PromptPerformance {
  const COLLECTION: Collection = Collection::PromptPerformance;

  fn key(&self) -> String { Self::key_for(self.category, &self.template_hash) }
}

// ─── Optimizations ───────────────────────────────────────────────────────────

/// Dominant weakness of an underperforming template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PromptIssue {
  HighErrorRate,
  SlowResponse,
  Clarity,
  Specificity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
  pub applied_at: DateTime<Utc>,
  pub issue:      PromptIssue,
  pub rule:       String,
  pub new_hash:   String,
}

/// One applied template rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptOptimization {
  pub optimization_id:     Uuid,
  pub category:            PromptCategory,
  pub source_hash:         String,
  pub optimized_hash:      String,
  pub issue:               PromptIssue,
  pub rule:                String,
  pub source_quality:      f64,
  pub source_success_rate: f64,
  pub created_at:          DateTime<Utc>,
}

impl Record for PromptOptimization {
  const COLLECTION: Collection = Collection::PromptOptimizations;

  fn key(&self) -> String { self.optimization_id.to_string() }
}

// ─── A/B tests ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Arm {
  A,
  B,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
  pub template_hash: String,
  pub uses:          u32,
  pub successes:     u32,
  pub rating_sum:    f64,
  pub ratings:       u32,
}

impl ArmStats {
  pub fn success_rate(&self) -> f64 {
    if self.uses == 0 { 0.0 } else { f64::from(self.successes) / f64::from(self.uses) }
  }

  pub fn average_rating(&self) -> f64 {
    if self.ratings == 0 { 0.0 } else { self.rating_sum / f64::from(self.ratings) }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AbTestStatus {
  Running,
  Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
  /// `None` is a tie.
  pub winner:                    Option<Arm>,
  pub statistically_significant: bool,
  pub chi_square:                f64,
  /// Percent; 95 when significant, otherwise 0.
  pub confidence:                f64,
  pub a:                         ArmStats,
  pub b:                         ArmStats,
  pub concluded_at:              DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTest {
  pub test_id:       Uuid,
  pub category:      PromptCategory,
  pub a:             ArmStats,
  pub b:             ArmStats,
  pub started_at:    DateTime<Utc>,
  pub duration_days: u32,
  pub status:        AbTestStatus,
  pub result:        Option<AbTestResult>,
}

impl AbTest {
  /// When the test stops accepting uses. Durations past the representable
  /// range never end.
  pub fn ends_at(&self) -> DateTime<Utc> {
    chrono::Duration::try_days(i64::from(self.duration_days))
      .and_then(|d| self.started_at.checked_add_signed(d))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }

  pub fn arm_mut(&mut self, arm: Arm) -> &mut ArmStats {
    match arm {
      Arm::A => &mut self.a,
      Arm::B => &mut self.b,
    }
  }
}

impl Record for AbTest {
  const COLLECTION: Collection = Collection::AbTests;

  fn key(&self) -> String { self.test_id.to_string() }
}
