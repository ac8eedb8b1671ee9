//! PromptPerformanceStore: template quality tracking, rule-based rewrites and
//! A/B tests.

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasa_core::{
  Resolved,
  history::AnalysisHistory,
  identity::template_hash,
  prompt::{
    AbTest, AbTestResult, AbTestStatus, Arm, ArmStats, MAX_RATING_HISTORY,
    OptimizationRecord, PromptCategory, PromptIssue, PromptOptimization, PromptPerformance,
  },
  report::PromptUsage,
  stats::{CHI_SQUARE_CRITICAL_P05, chi_square_2x2, ema},
  store::KnowledgeStore,
};
use uuid::Uuid;

use crate::{config::LearningConfig, knowledge::Knowledge};

/// Smoothing factor for latency, cost, quality and satisfaction averages.
const PROMPT_ALPHA: f64 = 0.2;
/// Latency at which response-time efficiency reaches zero.
const LATENCY_CEILING_MS: f64 = 20_000.0;
const MIN_USES_FOR_OPTIMIZATION: u32 = 5;
const QUALITY_FLOOR: f64 = 3.5;
const SUCCESS_FLOOR: f64 = 0.8;
const SIGNIFICANT_CONFIDENCE: f64 = 95.0;

// ─── Defaults ────────────────────────────────────────────────────────────────

/// The built-in template for a category with no performance data.
pub fn default_template(category: PromptCategory) -> &'static str {
  match category {
    PromptCategory::Valuation => {
      "Estimate the market value of the property described below. Use the \
       comparable sales provided, adjust for size, condition and location, and \
       return a low, high and most likely price with a confidence score."
    }
    PromptCategory::MarketAnalysis => {
      "Summarise the current market for the area below: price trend over the \
       last year, typical days on market, and the balance of supply and demand."
    }
    PromptCategory::Comparables => {
      "From the listings below, select the properties most comparable to the \
       subject property and explain the adjustments each one needs."
    }
    PromptCategory::Investment => {
      "Assess the property below as an investment: expected appreciation, \
       rental yield, liquidity and the main risks."
    }
    PromptCategory::Amenities => {
      "List the amenities near the property below that matter to buyers, with \
       their distance and why they matter."
    }
    PromptCategory::Developments => {
      "Describe planned developments near the property below and how each is \
       likely to affect its value."
    }
    PromptCategory::Summary => {
      "Write a short executive summary of the property analysis below for a \
       prospective buyer."
    }
  }
}

// ─── Rewrite rules ───────────────────────────────────────────────────────────

/// One deterministic template rewrite, selected by the issue it addresses.
pub struct RewriteRule {
  pub name:  &'static str,
  pub issue: PromptIssue,
  pub apply: fn(&str) -> String,
}

const FORMAT_REMINDER: &str =
  "Respond only with the requested fields as valid JSON. Use null for any value you cannot determine.";
const BREVITY_REMINDER: &str = "Be concise: give the figures first and keep explanations to one sentence each.";
const STRUCTURE_REMINDER: &str =
  "Format the answer as short headed sections and state every figure with its unit (EUR, m², %).";
const DOMAIN_CONTEXT: &str = "You are a property analyst for the Spanish residential market. \
   Base every statement on the supplied property data and local market figures.";

fn append_once(template: &str, sentence: &str) -> String {
  if template.contains(sentence) {
    template.to_string()
  } else {
    format!("{}\n\n{sentence}", template.trim_end())
  }
}

fn explicit_output_format(template: &str) -> String { append_once(template, FORMAT_REMINDER) }

fn concise_response(template: &str) -> String {
  let trimmed = template
    .replace("in detail ", "")
    .replace("detailed ", "")
    .replace("comprehensive ", "");
  append_once(&trimmed, BREVITY_REMINDER)
}

fn imperative_structure(template: &str) -> String {
  let direct = template
    .replace("Please ", "")
    .replace("please ", "")
    .replace("Could you ", "")
    .replace("could you ", "");
  append_once(&direct, STRUCTURE_REMINDER)
}

fn domain_context(template: &str) -> String {
  if template.contains(DOMAIN_CONTEXT) {
    template.to_string()
  } else {
    format!("{DOMAIN_CONTEXT}\n\n{}", template.trim_start())
  }
}

pub const REWRITE_RULES: &[RewriteRule] = &[
  RewriteRule {
    name:  "explicit_output_format",
    issue: PromptIssue::HighErrorRate,
    apply: explicit_output_format,
  },
  RewriteRule {
    name:  "concise_response",
    issue: PromptIssue::SlowResponse,
    apply: concise_response,
  },
  RewriteRule {
    name:  "imperative_structure",
    issue: PromptIssue::Clarity,
    apply: imperative_structure,
  },
  RewriteRule { name: "domain_context", issue: PromptIssue::Specificity, apply: domain_context },
];

pub fn rule_for(issue: PromptIssue) -> Option<&'static RewriteRule> {
  REWRITE_RULES.iter().find(|r| r.issue == issue)
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// `max(0, 1 − latency / 20 s)`.
pub fn response_efficiency(latency_ms: f64) -> f64 {
  (1.0 - latency_ms / LATENCY_CEILING_MS).max(0.0)
}

/// Weighted ranking score in `[0, 1]`: quality 40%, success rate 30%,
/// response-time efficiency 20%, user satisfaction 10%.
pub fn score(perf: &PromptPerformance) -> f64 {
  0.4 * perf.average_quality / 5.0
    + 0.3 * perf.success_rate
    + 0.2 * response_efficiency(perf.average_latency_ms)
    + 0.1 * perf.user_satisfaction / 5.0
}

pub fn needs_optimization(perf: &PromptPerformance) -> bool {
  let low_quality = !perf.ratings.is_empty() && perf.average_quality < QUALITY_FLOOR;
  perf.use_count >= MIN_USES_FOR_OPTIMIZATION
    && (low_quality || perf.success_rate < SUCCESS_FLOOR)
}

/// The dominant weakness, checked in order of severity.
pub fn classify_issue(perf: &PromptPerformance) -> PromptIssue {
  if perf.success_rate < 0.6 {
    PromptIssue::HighErrorRate
  } else if perf.average_latency_ms > 15_000.0 {
    PromptIssue::SlowResponse
  } else if !perf.ratings.is_empty() && perf.average_quality < 3.0 {
    PromptIssue::Clarity
  } else {
    PromptIssue::Specificity
  }
}

fn smooth(current: f64, value: f64, first: bool) -> f64 {
  if first { value } else { ema(current, value, PROMPT_ALPHA) }
}

/// Fold one invocation into `perf`.
pub fn apply_usage(perf: &mut PromptPerformance, usage: &PromptUsage, now: DateTime<Utc>) {
  let first = perf.use_count == 0;
  perf.use_count += 1;
  if usage.success {
    perf.success_count += 1;
  }
  perf.success_rate = f64::from(perf.success_count) / f64::from(perf.use_count);
  perf.average_latency_ms = smooth(perf.average_latency_ms, usage.latency_ms, first);
  perf.average_cost = smooth(perf.average_cost, usage.cost, first);
  if let Some(q) = usage.quality {
    let q = q.clamp(1.0, 5.0);
    perf.average_quality = smooth(perf.average_quality, q, perf.ratings.is_empty());
    AnalysisHistory::push_bounded(&mut perf.ratings, q, MAX_RATING_HISTORY);
  }
  perf.last_used = now;
}

/// Decide an A/B test from its arms. A winner needs `min_uses` per arm and a
/// chi-square above the p < 0.05 critical value; anything else is a tie.
pub fn evaluate(a: &ArmStats, b: &ArmStats, min_uses: u32, now: DateTime<Utc>) -> AbTestResult {
  let chi_square = chi_square_2x2(
    a.successes,
    a.uses - a.successes.min(a.uses),
    b.successes,
    b.uses - b.successes.min(b.uses),
  );
  let enough = a.uses >= min_uses && b.uses >= min_uses;
  let significant = enough && chi_square > CHI_SQUARE_CRITICAL_P05;
  let winner = if significant {
    match a.success_rate().total_cmp(&b.success_rate()) {
      std::cmp::Ordering::Greater => Some(Arm::A),
      std::cmp::Ordering::Less => Some(Arm::B),
      std::cmp::Ordering::Equal => None,
    }
  } else {
    None
  };
  AbTestResult {
    winner,
    statistically_significant: significant && winner.is_some(),
    chi_square,
    confidence: if significant && winner.is_some() { SIGNIFICANT_CONFIDENCE } else { 0.0 },
    a: a.clone(),
    b: b.clone(),
    concluded_at: now,
  }
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
  pub category:        PromptCategory,
  pub template_hash:   String,
  pub version:         u32,
  pub uses:            u32,
  pub success_rate:    f64,
  pub average_quality: f64,
  pub score:           f64,
}

impl From<&PromptPerformance> for TemplateSummary {
  fn from(p: &PromptPerformance) -> Self {
    Self {
      category:        p.category,
      template_hash:   p.template_hash.clone(),
      version:         p.version,
      uses:            p.use_count,
      success_rate:    p.success_rate,
      average_quality: p.average_quality,
      score:           score(p),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
  pub templates:  usize,
  pub total_uses: u32,
  pub best:       Option<TemplateSummary>,
  pub worst:      Option<TemplateSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptAnalytics {
  pub categories:      BTreeMap<PromptCategory, CategorySummary>,
  pub underperformers: Vec<TemplateSummary>,
  pub optimizations:   usize,
  pub running_tests:   usize,
  pub completed_tests: usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct PromptPerformanceStore<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> PromptPerformanceStore<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  pub async fn performance(&self, category: PromptCategory) -> Vec<PromptPerformance> {
    self
      .knowledge
      .all::<PromptPerformance>()
      .await
      .into_iter()
      .filter(|p| p.category == category)
      .collect()
  }

  pub async fn record_usage(
    &self,
    usage: &PromptUsage,
    now: DateTime<Utc>,
  ) -> Option<PromptPerformance> {
    let key = PromptPerformance::key_for(usage.category, &template_hash(&usage.template));
    let category = usage.category;
    let template = usage.template.clone();
    let usage = usage.clone();
    let perf = self
      .knowledge
      .modify(
        key,
        move || PromptPerformance::new(category, &template, 1, None, now),
        move |p: &mut PromptPerformance| apply_usage(p, &usage, now),
      )
      .await?;
    tracing::debug!(
      %category,
      hash = %perf.template_hash,
      uses = perf.use_count,
      "prompt usage recorded"
    );
    Some(perf)
  }

  /// Fold a user satisfaction rating (1–5) into a template's record.
  pub async fn record_rating(
    &self,
    category: PromptCategory,
    template: &str,
    rating: f64,
    now: DateTime<Utc>,
  ) -> Option<PromptPerformance> {
    let key = PromptPerformance::key_for(category, &template_hash(template));
    let template = template.to_string();
    let rating = rating.clamp(1.0, 5.0);
    self
      .knowledge
      .modify(
        key,
        move || PromptPerformance::new(category, &template, 1, None, now),
        move |p: &mut PromptPerformance| {
          p.user_satisfaction = smooth(p.user_satisfaction, rating, p.user_ratings == 0);
          p.user_ratings += 1;
        },
      )
      .await
  }

  /// The highest-scoring used template, or the built-in default.
  pub async fn best_prompt_template(&self, category: PromptCategory) -> Resolved<String> {
    let best = self
      .performance(category)
      .await
      .into_iter()
      .filter(|p| p.use_count > 0)
      .max_by(|a, b| score(a).total_cmp(&score(b)));
    match best {
      Some(p) => Resolved::Learned(p.template),
      None => Resolved::Default(default_template(category).to_string()),
    }
  }

  /// Rewrite every underperforming template once.
  pub async fn optimize_prompts(&self, now: DateTime<Utc>) -> Vec<PromptOptimization> {
    let all: Vec<PromptPerformance> = self.knowledge.all().await;
    self.optimize(all, now).await
  }

  /// Rewrite the underperforming templates of one category.
  pub async fn optimize_category(
    &self,
    category: PromptCategory,
    now: DateTime<Utc>,
  ) -> Vec<PromptOptimization> {
    let candidates = self.performance(category).await;
    self.optimize(candidates, now).await
  }

  async fn optimize(
    &self,
    candidates: Vec<PromptPerformance>,
    now: DateTime<Utc>,
  ) -> Vec<PromptOptimization> {
    let mut applied = Vec::new();
    for perf in candidates {
      if !needs_optimization(&perf) || !perf.optimization_history.is_empty() {
        continue;
      }
      if let Some(opt) = self.rewrite(&perf, now).await {
        applied.push(opt);
      }
    }
    applied
  }

  async fn rewrite(&self, perf: &PromptPerformance, now: DateTime<Utc>) -> Option<PromptOptimization> {
    let issue = classify_issue(perf);
    let rule = rule_for(issue)?;
    let rewritten = (rule.apply)(&perf.template);
    let new_hash = template_hash(&rewritten);
    if new_hash == perf.template_hash {
      return None;
    }

    // Claim the source atomically: a template is rewritten at most once.
    let record = OptimizationRecord {
      applied_at: now,
      issue,
      rule: rule.name.to_string(),
      new_hash: new_hash.clone(),
    };
    let claim = Arc::new(AtomicBool::new(false));
    let claimed = Arc::clone(&claim);
    self
      .knowledge
      .modify_existing(perf_key(perf), move |p: &mut PromptPerformance| {
        if p.optimization_history.is_empty() {
          p.optimization_history.push(record);
          claimed.store(true, Ordering::Relaxed);
        }
      })
      .await?;
    if !claim.load(Ordering::Relaxed) {
      tracing::debug!(hash = %perf.template_hash, "prompt template already optimized");
      return None;
    }

    let category = perf.category;
    let version = perf.version + 1;
    let source_hash = perf.template_hash.clone();
    let derived_from = Some(source_hash.clone());
    self
      .knowledge
      .modify(
        PromptPerformance::key_for(category, &new_hash),
        move || PromptPerformance::new(category, &rewritten, version, derived_from, now),
        |_: &mut PromptPerformance| {},
      )
      .await?;

    let optimization = PromptOptimization {
      optimization_id:     Uuid::new_v4(),
      category,
      source_hash,
      optimized_hash:      new_hash,
      issue,
      rule:                rule.name.to_string(),
      source_quality:      perf.average_quality,
      source_success_rate: perf.success_rate,
      created_at:          now,
    };
    if !self.knowledge.save(&optimization).await {
      return None;
    }
    tracing::info!(
      %category,
      %issue,
      rule = rule.name,
      version,
      "prompt template optimized"
    );
    Some(optimization)
  }

  // ─── A/B tests ─────────────────────────────────────────────────────────────

  pub async fn start_ab_test(
    &self,
    category: PromptCategory,
    template_a: &str,
    template_b: &str,
    duration_days: u32,
    now: DateTime<Utc>,
  ) -> AbTest {
    let test = AbTest {
      test_id: Uuid::new_v4(),
      category,
      a: ArmStats { template_hash: template_hash(template_a), ..ArmStats::default() },
      b: ArmStats { template_hash: template_hash(template_b), ..ArmStats::default() },
      started_at: now,
      duration_days,
      status: AbTestStatus::Running,
      result: None,
    };
    self.knowledge.save(&test).await;
    tracing::info!(test = %test.test_id, %category, duration_days, "A/B test started");
    test
  }

  pub async fn ab_test(&self, test_id: Uuid) -> Option<AbTest> {
    self.knowledge.load(&test_id.to_string()).await
  }

  /// Record one use of `arm`. Uses outside the test window are ignored.
  pub async fn record_ab_usage(
    &self,
    test_id: Uuid,
    arm: Arm,
    success: bool,
    rating: Option<f64>,
    now: DateTime<Utc>,
  ) -> Option<AbTest> {
    self
      .knowledge
      .modify_existing(test_id.to_string(), move |t: &mut AbTest| {
        if t.status != AbTestStatus::Running || now >= t.ends_at() || now < t.started_at {
          return;
        }
        let stats = t.arm_mut(arm);
        stats.uses += 1;
        if success {
          stats.successes += 1;
        }
        if let Some(r) = rating {
          stats.rating_sum += r.clamp(1.0, 5.0);
          stats.ratings += 1;
        }
      })
      .await
  }

  /// Compute the current result. The test is marked completed once its
  /// window has elapsed.
  pub async fn evaluate_ab_test(&self, test_id: Uuid, now: DateTime<Utc>) -> Option<AbTestResult> {
    let min_uses = self.config.ab_min_uses_per_arm;
    let test = self
      .knowledge
      .modify_existing(test_id.to_string(), move |t: &mut AbTest| {
        if t.status == AbTestStatus::Completed {
          return;
        }
        let result = evaluate(&t.a, &t.b, min_uses, now);
        if now >= t.ends_at() {
          t.status = AbTestStatus::Completed;
        }
        t.result = Some(result);
      })
      .await?;

    if let Some(result) = &test.result
      && test.status == AbTestStatus::Completed
      && result.concluded_at == now
    {
      tracing::info!(
        test = %test.test_id,
        winner = ?result.winner,
        significant = result.statistically_significant,
        "A/B test concluded"
      );
    }
    test.result
  }

  pub async fn analytics(&self) -> PromptAnalytics {
    let all: Vec<PromptPerformance> = self.knowledge.all().await;
    let tests: Vec<AbTest> = self.knowledge.all().await;
    let optimizations = self.knowledge.all::<PromptOptimization>().await.len();

    let mut by_category: BTreeMap<PromptCategory, Vec<&PromptPerformance>> = BTreeMap::new();
    for p in &all {
      by_category.entry(p.category).or_default().push(p);
    }
    let categories = by_category
      .into_iter()
      .map(|(category, perfs)| {
        let used: Vec<&PromptPerformance> =
          perfs.iter().copied().filter(|p| p.use_count > 0).collect();
        let best = used.iter().copied().max_by(|a, b| score(a).total_cmp(&score(b)));
        let worst = used.iter().copied().min_by(|a, b| score(a).total_cmp(&score(b)));
        (category, CategorySummary {
          templates:  perfs.len(),
          total_uses: perfs.iter().map(|p| p.use_count).sum(),
          best:       best.map(TemplateSummary::from),
          worst:      worst.map(TemplateSummary::from),
        })
      })
      .collect();

    PromptAnalytics {
      categories,
      underperformers: all
        .iter()
        .filter(|p| needs_optimization(p))
        .map(TemplateSummary::from)
        .collect(),
      optimizations,
      running_tests: tests.iter().filter(|t| t.status == AbTestStatus::Running).count(),
      completed_tests: tests.iter().filter(|t| t.status == AbTestStatus::Completed).count(),
    }
  }
}

fn perf_key(perf: &PromptPerformance) -> String {
  PromptPerformance::key_for(perf.category, &perf.template_hash)
}

#[cfg(test)]
mod tests {
  use chrono::Duration;
  use tasa_core::memory::MemoryStore;

  use super::*;

  fn store() -> PromptPerformanceStore<MemoryStore> {
    PromptPerformanceStore::new(
      Knowledge::new(Arc::new(MemoryStore::new())),
      LearningConfig::default(),
    )
  }

  fn usage(template: &str, success: bool, quality: f64, latency_ms: f64) -> PromptUsage {
    PromptUsage {
      category: PromptCategory::Valuation,
      template: template.to_string(),
      latency_ms,
      cost: 0.01,
      success,
      quality: Some(quality),
    }
  }

  #[tokio::test]
  async fn falls_back_to_default_template() {
    let s = store();
    let best = s.best_prompt_template(PromptCategory::Summary).await;
    assert_eq!(best, Resolved::Default(default_template(PromptCategory::Summary).to_string()));
  }

  #[tokio::test]
  async fn best_template_ranks_by_weighted_score() {
    let s = store();
    let now = Utc::now();
    for _ in 0..5 {
      s.record_usage(&usage("good template", true, 4.8, 2_000.0), now).await;
      s.record_usage(&usage("slow weak template", false, 2.0, 18_000.0), now).await;
    }
    let best = s.best_prompt_template(PromptCategory::Valuation).await;
    assert_eq!(best, Resolved::Learned("good template".to_string()));
  }

  #[test]
  fn score_weights_sum_to_one_for_a_perfect_template() {
    let mut p = PromptPerformance::new(PromptCategory::Summary, "t", 1, None, Utc::now());
    p.average_quality = 5.0;
    p.success_rate = 1.0;
    p.average_latency_ms = 0.0;
    p.user_satisfaction = 5.0;
    assert!((score(&p) - 1.0).abs() < 1e-9);
    assert_eq!(response_efficiency(25_000.0), 0.0);
  }

  #[test]
  fn issues_classified_by_severity() {
    let mut p = PromptPerformance::new(PromptCategory::Summary, "t", 1, None, Utc::now());
    p.use_count = 10;
    p.success_rate = 0.5;
    assert_eq!(classify_issue(&p), PromptIssue::HighErrorRate);
    p.success_rate = 0.7;
    p.average_latency_ms = 16_000.0;
    assert_eq!(classify_issue(&p), PromptIssue::SlowResponse);
    p.average_latency_ms = 1_000.0;
    p.ratings = vec![2.0];
    p.average_quality = 2.5;
    assert_eq!(classify_issue(&p), PromptIssue::Clarity);
    p.average_quality = 3.2;
    assert_eq!(classify_issue(&p), PromptIssue::Specificity);
  }

  #[test]
  fn every_issue_has_exactly_one_idempotent_rule() {
    for issue in [
      PromptIssue::HighErrorRate,
      PromptIssue::SlowResponse,
      PromptIssue::Clarity,
      PromptIssue::Specificity,
    ] {
      assert_eq!(REWRITE_RULES.iter().filter(|r| r.issue == issue).count(), 1);
      let rule = rule_for(issue).unwrap();
      let once = (rule.apply)("Please give a detailed valuation.");
      assert_ne!(once, "Please give a detailed valuation.");
      assert_eq!((rule.apply)(&once), once, "{} is not idempotent", rule.name);
    }
  }

  #[tokio::test]
  async fn optimization_registers_a_new_version_once() {
    let s = store();
    let now = Utc::now();
    for _ in 0..6 {
      s.record_usage(&usage("Please value this.", false, 2.0, 1_000.0), now).await;
    }

    let applied = s.optimize_prompts(now).await;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].issue, PromptIssue::HighErrorRate);
    assert_eq!(applied[0].rule, "explicit_output_format");

    let versions = s.performance(PromptCategory::Valuation).await;
    assert_eq!(versions.len(), 2);
    let derived = versions.iter().find(|p| p.version == 2).unwrap();
    assert_eq!(derived.derived_from.as_deref(), Some(applied[0].source_hash.as_str()));

    // The source is not rewritten a second time.
    assert!(s.optimize_prompts(now).await.is_empty());
  }

  #[tokio::test]
  async fn stale_snapshot_does_not_rewrite_twice() {
    let s = store();
    let now = Utc::now();
    for _ in 0..6 {
      s.record_usage(&usage("Please value this.", false, 2.0, 1_000.0), now).await;
    }
    // Two callers read the same unoptimized record.
    let snapshot = s.performance(PromptCategory::Valuation).await;
    assert_eq!(snapshot.len(), 1);

    assert_eq!(s.optimize(snapshot.clone(), now).await.len(), 1);
    assert!(s.optimize(snapshot, now).await.is_empty());

    let source = s
      .performance(PromptCategory::Valuation)
      .await
      .into_iter()
      .find(|p| p.version == 1)
      .unwrap();
    assert_eq!(source.optimization_history.len(), 1);
    assert_eq!(s.knowledge.all::<PromptOptimization>().await.len(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_optimizations_apply_once() {
    let s = Arc::new(store());
    let now = Utc::now();
    for _ in 0..6 {
      s.record_usage(&usage("Please value this.", false, 2.0, 1_000.0), now).await;
    }

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let s = Arc::clone(&s);
        tokio::spawn(async move { s.optimize_category(PromptCategory::Valuation, now).await })
      })
      .collect();
    let mut applied = 0;
    for h in handles {
      applied += h.await.unwrap().len();
    }

    assert_eq!(applied, 1);
    assert_eq!(s.knowledge.all::<PromptOptimization>().await.len(), 1);
    assert_eq!(s.analytics().await.optimizations, 1);
  }

  #[tokio::test]
  async fn very_long_ab_test_accepts_uses() {
    let s = store();
    let now = Utc::now();
    let test = s
      .start_ab_test(PromptCategory::Valuation, "template a", "template b", 100_000_000, now)
      .await;
    assert_eq!(test.ends_at(), DateTime::<Utc>::MAX_UTC);

    let recorded = s
      .record_ab_usage(test.test_id, Arm::A, true, Some(4.0), now + Duration::days(365))
      .await
      .unwrap();
    assert_eq!(recorded.a.uses, 1);

    let result = s.evaluate_ab_test(test.test_id, now).await.unwrap();
    assert!(!result.statistically_significant);
    assert_eq!(s.ab_test(test.test_id).await.unwrap().status, AbTestStatus::Running);
  }

  #[test]
  fn ab_test_below_minimum_uses_is_never_significant() {
    let a = ArmStats {
      template_hash: "a".into(),
      uses:          25,
      successes:     25,
      rating_sum:    125.0,
      ratings:       25,
    };
    let b = ArmStats {
      template_hash: "b".into(),
      uses:          25,
      successes:     0,
      rating_sum:    25.0,
      ratings:       25,
    };
    let r = evaluate(&a, &b, 30, Utc::now());
    assert!(r.chi_square > CHI_SQUARE_CRITICAL_P05);
    assert!(!r.statistically_significant);
    assert_eq!(r.winner, None);
    assert_eq!(r.confidence, 0.0);
  }

  #[tokio::test]
  async fn ab_test_declares_significant_winner() {
    let s = store();
    let start = Utc::now();
    let test = s
      .start_ab_test(PromptCategory::Summary, "template a", "template b", 7, start)
      .await;

    for i in 0..40 {
      let at = start + Duration::hours(1);
      s.record_ab_usage(test.test_id, Arm::A, i < 36, Some(4.0), at).await;
      s.record_ab_usage(test.test_id, Arm::B, i < 20, Some(3.0), at).await;
    }
    // Outside the window: ignored.
    s.record_ab_usage(test.test_id, Arm::B, true, None, start + Duration::days(8))
      .await;

    let result = s
      .evaluate_ab_test(test.test_id, start + Duration::days(8))
      .await
      .unwrap();
    assert_eq!(result.winner, Some(Arm::A));
    assert!(result.statistically_significant);
    assert_eq!(result.confidence, 95.0);
    assert_eq!(result.b.uses, 40);

    let stored = s.ab_test(test.test_id).await.unwrap();
    assert_eq!(stored.status, AbTestStatus::Completed);
  }
}
