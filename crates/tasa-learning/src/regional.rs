//! RegionalIntelligence: per-region market knowledge learned from finished
//! reports, and the performance forecasts it backs.
//!
//! Every scope of a report (neighborhood, postal area, city, province) is a
//! separate [`RegionalKnowledge`] record. Averages here are arithmetic
//! running means weighted by the samples seen, not moving averages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::IntoEnumIterator as _;
use tasa_core::{
  identity::normalize_name,
  region::{
    DemographicSnapshot, DevelopmentImpact, DistanceBucket, Granularity, Level,
    MAX_DEMOGRAPHIC_SNAPSHOTS, MarketCharacteristics, PricingPattern, RegionKey,
    RegionalKnowledge, SeasonalAdjustment, SizeBand,
  },
  report::{
    FutureDevelopment, ImpactKind, InvestmentGrade, Property, PropertyType, Report, Season, Trend,
  },
  stats::{clamp_confidence, mean, running_mean},
  store::KnowledgeStore,
};

use crate::{config::LearningConfig, knowledge::Knowledge};

/// Reports scored below this are not learned from.
pub const MIN_ANALYSIS_QUALITY: f64 = 20.0;
/// Deviation from the region average that marks a type best or worst.
const PERFORMANCE_DEVIATION_PCT: f64 = 10.0;
const FAST_MARKET_DAYS: f64 = 30.0;
const SLOW_MARKET_DAYS: f64 = 90.0;
const STAGNANT_MARKET_DAYS: f64 = 120.0;
const DEVELOPMENT_IMPACT_PCT: f64 = 5.0;
const AMENITY_RADIUS_KM: f64 = 2.0;
const MIN_PRICE_BAND_PCT: f64 = 5.0;
const PATTERN_MIN_DATA_POINTS: u32 = 3;
const EMERGING_APPRECIATION_PCT: f64 = 5.0;
const DECLINING_APPRECIATION_PCT: f64 = -3.0;
const HIGH_VOLATILITY_PCT: f64 = 15.0;
const HIGH_YIELD_PCT: f64 = 5.0;
const RISK_PENALTY: f64 = 5.0;

// ─── Observation ─────────────────────────────────────────────────────────────

/// The facts of one report that regional learning folds in.
#[derive(Debug, Clone)]
pub struct AnalysisObservation {
  pub property_type:  PropertyType,
  pub area_m2:        Option<f64>,
  pub bedrooms:       Option<u32>,
  pub price_per_m2:   Option<f64>,
  pub days_on_market: Option<f64>,
  pub appreciation:   Option<f64>,
  /// Gross yield in percent.
  pub rental_yield:   Option<f64>,
  pub developments:   Vec<FutureDevelopment>,
  /// Amenity kind → count within 2 km.
  pub amenities:      BTreeMap<String, u32>,
  pub season:         Season,
}

impl AnalysisObservation {
  pub fn from_report(report: &Report) -> Self {
    let comparable_price = mean(
      &report
        .comparables
        .iter()
        .filter_map(|c| c.price_per_m2())
        .collect::<Vec<_>>(),
    );
    let rental_yield = report.valuation.and_then(|v| {
      let rent = v.monthly_rent?;
      (v.estimated > 0.0).then(|| rent * 12.0 / v.estimated * 100.0)
    });
    let mut amenities = BTreeMap::new();
    for a in report.amenities.iter().filter(|a| a.distance_km <= AMENITY_RADIUS_KM) {
      *amenities.entry(normalize_name(&a.kind)).or_insert(0) += 1;
    }
    Self {
      property_type: report.property.property_type,
      area_m2: report.property.area_m2.filter(|a| *a > 0.0),
      bedrooms: report.property.bedrooms,
      price_per_m2: report.price_per_m2().or(comparable_price),
      days_on_market: report.market_trend.and_then(|t| t.days_on_market),
      appreciation: report.market_trend.map(|t| t.yearly_change_pct),
      rental_yield,
      developments: report.developments.clone(),
      amenities,
      season: Season::of(report.generated_at),
    }
  }
}

/// Every scope a property belongs to, most specific first.
pub fn scopes_of(property: &Property) -> Vec<(RegionKey, String)> {
  let candidates = [
    (Granularity::Neighborhood, property.neighborhood.as_deref()),
    (Granularity::PostalArea, property.postal_code.as_deref()),
    (Granularity::City, Some(property.city.as_str())),
    (Granularity::Province, Some(property.province.as_str())),
  ];
  candidates
    .into_iter()
    .filter_map(|(g, name)| {
      let name = name?.trim();
      let key = RegionKey::new(g, name);
      (!key.name.is_empty()).then(|| (key, name.to_string()))
    })
    .collect()
}

// ─── Learning rules ──────────────────────────────────────────────────────────

fn level_points(level: Level, high: f64, medium: f64) -> f64 {
  match level {
    Level::High => high,
    Level::Medium => medium,
    Level::Low => 0.0,
  }
}

/// 0–100 point score behind the investment grade.
pub fn investment_score(market: &MarketCharacteristics) -> f64 {
  let appreciation = if market.appreciation_samples == 0 {
    10.0
  } else {
    (market.appreciation_rate.clamp(-5.0, 10.0) + 5.0) / 15.0 * 25.0
  };
  let rental_yield = market
    .rental_yield
    .map_or(10.0, |y| y.clamp(0.0, 8.0) / 8.0 * 25.0);
  let liquidity = if market.days_on_market_samples == 0 {
    10.0
  } else {
    match market.average_days_on_market {
      d if d < 30.0 => 20.0,
      d if d < 60.0 => 15.0,
      d if d < 90.0 => 10.0,
      d if d < 120.0 => 5.0,
      _ => 0.0,
    }
  };
  let demand = level_points(market.demand_level, 15.0, 8.0);
  // Scarce inventory scores, so the scale is inverted.
  let scarcity = match market.inventory_level {
    Level::Low => 15.0,
    Level::Medium => 8.0,
    Level::High => 0.0,
  };
  let penalty = RISK_PENALTY * market.risk_factors.len() as f64;
  (appreciation + rental_yield + liquidity + demand + scarcity - penalty).clamp(0.0, 100.0)
}

/// min(60, 5·data points) + min(25, 5·patterns) + min(15, 5·mature patterns).
pub fn regional_confidence(k: &RegionalKnowledge) -> f64 {
  let points = (5.0 * f64::from(k.data_points)).min(60.0);
  let patterns = (5.0 * k.pricing_patterns.len() as f64).min(25.0);
  let mature = (5.0 * k.pricing_patterns.iter().filter(|p| p.is_mature()).count() as f64).min(15.0);
  clamp_confidence(points + patterns + mature)
}

fn development_impact_pct(impact: ImpactKind) -> f64 {
  match impact {
    ImpactKind::Positive => DEVELOPMENT_IMPACT_PCT,
    ImpactKind::Negative => -DEVELOPMENT_IMPACT_PCT,
    ImpactKind::Neutral => 0.0,
  }
}

fn fold_development(k: &mut RegionalKnowledge, d: &FutureDevelopment, now: DateTime<Utc>) {
  let name = normalize_name(&d.name);
  if name.is_empty() {
    return;
  }
  let bucket = DistanceBucket::of(d.distance_km);
  match k.development_impacts.iter_mut().find(|i| i.name == name) {
    Some(existing) => {
      existing.observations += 1;
      existing.last_seen = now;
      existing.impact = d.impact;
      existing.price_impact_pct = development_impact_pct(d.impact);
      if bucket.attenuation() > existing.distance_bucket.attenuation() {
        existing.distance_bucket = bucket;
      }
    }
    None => k.development_impacts.push(DevelopmentImpact {
      name,
      impact: d.impact,
      distance_bucket: bucket,
      price_impact_pct: development_impact_pct(d.impact),
      observations: 1,
      first_seen: now,
      last_seen: now,
    }),
  }
}

fn classify_types(k: &mut RegionalKnowledge) {
  let region_avg = k.market.average_price_per_m2;
  if region_avg <= 0.0 {
    return;
  }
  let mut per_type: BTreeMap<PropertyType, (f64, u32)> = BTreeMap::new();
  for p in &k.pricing_patterns {
    let entry = per_type.entry(p.property_type).or_insert((0.0, 0));
    entry.0 += p.average_price_per_m2 * f64::from(p.sample_size);
    entry.1 += p.sample_size;
  }
  let market = &mut k.market;
  for (property_type, (weighted, samples)) in per_type {
    if samples == 0 {
      continue;
    }
    let deviation = (weighted / f64::from(samples) / region_avg - 1.0) * 100.0;
    market.best_performing_types.retain(|t| *t != property_type);
    market.worst_performing_types.retain(|t| *t != property_type);
    if deviation >= PERFORMANCE_DEVIATION_PCT {
      market.best_performing_types.push(property_type);
    } else if deviation <= -PERFORMANCE_DEVIATION_PCT {
      market.worst_performing_types.push(property_type);
    }
  }
}

fn refresh_signals(k: &mut RegionalKnowledge) {
  let market = &mut k.market;
  let mut risks = Vec::new();
  let mut opportunities = Vec::new();

  if market.price_stats.count >= 2 && market.price_volatility > HIGH_VOLATILITY_PCT {
    risks.push(format!("high price volatility ({:.0}%)", market.price_volatility));
  }
  if market.appreciation_samples > 0 {
    if market.appreciation_rate < DECLINING_APPRECIATION_PCT {
      risks.push(format!("declining prices ({:.1}% a year)", market.appreciation_rate));
    } else if market.appreciation_rate > EMERGING_APPRECIATION_PCT {
      opportunities.push(format!("strong appreciation ({:.1}% a year)", market.appreciation_rate));
    }
  }
  if market.days_on_market_samples > 0 && market.average_days_on_market > STAGNANT_MARKET_DAYS {
    risks.push(format!("slow sales ({:.0} days on market)", market.average_days_on_market));
  }
  if let Some(y) = market.rental_yield
    && y > HIGH_YIELD_PCT
  {
    opportunities.push(format!("high rental yield ({y:.1}%)"));
  }
  if market.demand_level == Level::High && market.inventory_level == Level::Low {
    opportunities.push("demand outpaces supply".to_string());
  }
  for d in &k.development_impacts {
    let close = matches!(d.distance_bucket, DistanceBucket::Immediate | DistanceBucket::Near);
    match d.impact {
      ImpactKind::Negative if close => risks.push(format!("negative development nearby: {}", d.name)),
      ImpactKind::Positive if close => {
        opportunities.push(format!("upcoming development nearby: {}", d.name))
      }
      _ => {}
    }
  }

  market.risk_factors = risks;
  market.opportunities = opportunities;
  market.investment_score = investment_score(market);
  market.investment_grade = InvestmentGrade::from_score(market.investment_score);
}

/// Fold one observation into a region's knowledge.
pub fn apply_observation(k: &mut RegionalKnowledge, obs: &AnalysisObservation, now: DateTime<Utc>) {
  let market = &mut k.market;

  if let Some(x) = obs.price_per_m2 {
    market.price_stats.push(x);
    market.average_price_per_m2 = market.price_stats.mean;
    market.price_volatility = market.price_stats.coefficient_of_variation();
  }
  if let Some(dom) = obs.days_on_market {
    market.average_days_on_market =
      running_mean(market.average_days_on_market, market.days_on_market_samples, dom);
    market.days_on_market_samples += 1;
    (market.inventory_level, market.demand_level) = if market.average_days_on_market < FAST_MARKET_DAYS {
      (Level::Low, Level::High)
    } else if market.average_days_on_market > SLOW_MARKET_DAYS {
      (Level::High, Level::Low)
    } else {
      (Level::Medium, Level::Medium)
    };
  }
  if let Some(a) = obs.appreciation {
    market.appreciation_rate = running_mean(market.appreciation_rate, market.appreciation_samples, a);
    market.appreciation_samples += 1;
  }
  if let Some(y) = obs.rental_yield {
    let current = market.rental_yield.unwrap_or(0.0);
    market.rental_yield = Some(running_mean(current, market.rental_yield_samples, y));
    market.rental_yield_samples += 1;
  }

  let region_avg = market.average_price_per_m2;
  let avg_dom = market.average_days_on_market;

  if let (Some(x), Some(area)) = (obs.price_per_m2, obs.area_m2) {
    let band = SizeBand::of(area);
    match k
      .pricing_patterns
      .iter_mut()
      .find(|p| p.property_type == obs.property_type && p.size_band == band)
    {
      Some(p) => {
        p.average_price_per_m2 = running_mean(p.average_price_per_m2, p.sample_size, x);
        p.sample_size += 1;
        p.last_updated = now;
      }
      None => {
        tracing::info!(
          region = %k.region,
          property_type = %obs.property_type,
          size_band = %band,
          "new pricing pattern"
        );
        k.pricing_patterns.push(PricingPattern {
          property_type:        obs.property_type,
          size_band:            band,
          average_price_per_m2: x,
          premium_pct:          0.0,
          sample_size:          1,
          first_seen:           now,
          last_updated:         now,
        });
      }
    }
  }
  if region_avg > 0.0 {
    for p in &mut k.pricing_patterns {
      p.premium_pct = (p.average_price_per_m2 / region_avg - 1.0) * 100.0;
    }
  }
  classify_types(k);

  for d in &obs.developments {
    fold_development(k, d, now);
  }

  if obs.price_per_m2.is_some() || obs.days_on_market.is_some() {
    let price_adj = obs
      .price_per_m2
      .filter(|_| region_avg > 0.0)
      .map(|x| (x / region_avg - 1.0) * 100.0);
    let dom_adj = obs.days_on_market.map(|d| d - avg_dom);
    match k.seasonal.iter_mut().find(|s| s.season == obs.season) {
      Some(s) => {
        if let Some(p) = price_adj {
          s.price_adjustment_pct = running_mean(s.price_adjustment_pct, s.sample_size, p);
        }
        if let Some(d) = dom_adj {
          s.days_on_market_adjustment = running_mean(s.days_on_market_adjustment, s.sample_size, d);
        }
        s.sample_size += 1;
      }
      None => k.seasonal.push(SeasonalAdjustment {
        season:                    obs.season,
        price_adjustment_pct:      price_adj.unwrap_or(0.0),
        days_on_market_adjustment: dom_adj.unwrap_or(0.0),
        sample_size:               1,
      }),
    }
  }

  if !obs.amenities.is_empty() {
    tasa_core::history::AnalysisHistory::push_bounded(
      &mut k.demographics,
      DemographicSnapshot {
        captured_at:      now,
        property_type:    obs.property_type,
        bedrooms:         obs.bedrooms,
        nearby_amenities: obs.amenities.clone(),
      },
      MAX_DEMOGRAPHIC_SNAPSHOTS,
    );
  }

  k.data_points += 1;
  refresh_signals(k);
  k.confidence = regional_confidence(k);
  k.last_updated = now;
}

// ─── Outbound shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformancePrediction {
  pub region:                  RegionKey,
  pub price_low:               f64,
  pub price_estimate:          f64,
  pub price_high:              f64,
  pub price_per_m2:            f64,
  pub trend:                   Trend,
  pub expected_days_on_market: Option<f64>,
  pub investment_grade:        InvestmentGrade,
  pub risks:                   Vec<String>,
  pub opportunities:           Vec<String>,
  pub confidence:              f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternFinding {
  pub region:      RegionKey,
  pub description: String,
  pub value:       f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketPatterns {
  pub emerging_trends: Vec<PatternFinding>,
  pub anomalies:       Vec<PatternFinding>,
  pub opportunities:   Vec<PatternFinding>,
  pub risks:           Vec<PatternFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalInsights {
  pub region:       RegionKey,
  pub display_name: String,
  pub reliable:     bool,
  pub data_points:  u32,
  pub confidence:   f64,
  pub market:       MarketCharacteristics,
  /// Most sampled patterns first.
  pub top_patterns: Vec<PricingPattern>,
  pub developments: Vec<DevelopmentImpact>,
  pub seasonal:     Vec<SeasonalAdjustment>,
  pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalSummary {
  pub regions:            usize,
  pub by_granularity:     BTreeMap<Granularity, usize>,
  pub reliable_regions:   usize,
  pub total_data_points:  u64,
  pub average_confidence: Option<f64>,
}

fn trend_of(appreciation: f64) -> Trend {
  match appreciation {
    a if a > 2.0 => Trend::Rising,
    a if a < -2.0 => Trend::Falling,
    _ => Trend::Stable,
  }
}

// ─── Component ───────────────────────────────────────────────────────────────

pub struct RegionalIntelligence<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> RegionalIntelligence<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  /// Fold `report` into every scope it belongs to. Returns the updated
  /// records; empty when the report was skipped.
  pub async fn learn_from_analysis(
    &self,
    report: &Report,
    analysis_quality: f64,
    now: DateTime<Utc>,
  ) -> Vec<RegionalKnowledge> {
    if analysis_quality < MIN_ANALYSIS_QUALITY {
      tracing::debug!(
        session = %report.session_id,
        quality = analysis_quality,
        "analysis below quality gate, not learned"
      );
      return Vec::new();
    }
    let obs = AnalysisObservation::from_report(report);
    let mut updated = Vec::new();
    for (key, display) in scopes_of(&report.property) {
      let observation = obs.clone();
      let init_key = key.clone();
      let record = self
        .knowledge
        .modify(
          key.to_string(),
          move || RegionalKnowledge::new(init_key, &display, now),
          move |k: &mut RegionalKnowledge| apply_observation(k, &observation, now),
        )
        .await;
      if let Some(record) = record {
        tracing::debug!(
          region = %record.region,
          data_points = record.data_points,
          confidence = record.confidence,
          "regional knowledge updated"
        );
        updated.push(record);
      }
    }
    updated
  }

  pub async fn knowledge_for(&self, key: &RegionKey) -> Option<RegionalKnowledge> {
    self.knowledge.load(&key.to_string()).await
  }

  /// Forecast from the most specific reliable scope, or `None` when no scope
  /// clears the confidence floor or the area is unknown.
  pub async fn predict_property_performance(
    &self,
    property: &Property,
    season: Option<Season>,
  ) -> Option<PerformancePrediction> {
    let area = property.area_m2.filter(|a| *a > 0.0)?;
    for (key, _) in scopes_of(property) {
      let Some(k) = self.knowledge_for(&key).await else {
        continue;
      };
      if k.confidence < self.config.regional_confidence_floor
        || k.market.average_price_per_m2 <= 0.0
      {
        continue;
      }
      return Some(forecast(&k, property.property_type, area, season));
    }
    None
  }

  pub async fn detect_market_patterns(&self) -> MarketPatterns {
    let mut patterns = MarketPatterns::default();
    let regions: Vec<RegionalKnowledge> = self.knowledge.all().await;
    for k in regions.iter().filter(|k| k.data_points >= PATTERN_MIN_DATA_POINTS) {
      let m = &k.market;
      let finding = |description: String, value: f64| PatternFinding {
        region: k.region.clone(),
        description,
        value,
      };
      if m.appreciation_samples > 0 {
        if m.appreciation_rate > EMERGING_APPRECIATION_PCT {
          patterns
            .emerging_trends
            .push(finding("rapid appreciation".into(), m.appreciation_rate));
        } else if m.appreciation_rate < DECLINING_APPRECIATION_PCT {
          patterns.risks.push(finding("declining prices".into(), m.appreciation_rate));
        }
      }
      if m.inventory_level == m.demand_level && m.inventory_level != Level::Medium {
        patterns.anomalies.push(finding(
          format!("inventory and demand both {}", m.inventory_level),
          m.average_days_on_market,
        ));
      }
      if m.days_on_market_samples > 0 {
        if m.average_days_on_market < FAST_MARKET_DAYS {
          patterns
            .opportunities
            .push(finding("fast-moving market".into(), m.average_days_on_market));
        } else if m.average_days_on_market > STAGNANT_MARKET_DAYS {
          patterns
            .risks
            .push(finding("stagnant market".into(), m.average_days_on_market));
        }
      }
    }
    if !patterns.emerging_trends.is_empty() {
      tracing::info!(count = patterns.emerging_trends.len(), "emerging market trends detected");
    }
    patterns
  }

  /// Insights for `region` at the most specific granularity known.
  pub async fn regional_insights(&self, region: &str) -> Option<RegionalInsights> {
    for granularity in Granularity::iter() {
      let key = RegionKey::new(granularity, region);
      if let Some(k) = self.knowledge_for(&key).await {
        let mut top_patterns = k.pricing_patterns.clone();
        top_patterns.sort_by(|a, b| b.sample_size.cmp(&a.sample_size));
        top_patterns.truncate(5);
        return Some(RegionalInsights {
          reliable: k.confidence >= self.config.regional_confidence_floor,
          region: k.region,
          display_name: k.display_name,
          data_points: k.data_points,
          confidence: k.confidence,
          market: k.market,
          top_patterns,
          developments: k.development_impacts,
          seasonal: k.seasonal,
          last_updated: k.last_updated,
        });
      }
    }
    None
  }

  pub async fn summary(&self) -> RegionalSummary {
    let regions: Vec<RegionalKnowledge> = self.knowledge.all().await;
    let mut by_granularity = BTreeMap::new();
    for k in &regions {
      *by_granularity.entry(k.region.granularity).or_insert(0) += 1;
    }
    RegionalSummary {
      regions: regions.len(),
      by_granularity,
      reliable_regions: regions
        .iter()
        .filter(|k| k.confidence >= self.config.regional_confidence_floor)
        .count(),
      total_data_points: regions.iter().map(|k| u64::from(k.data_points)).sum(),
      average_confidence: mean(&regions.iter().map(|k| k.confidence).collect::<Vec<_>>()),
    }
  }
}

/// Price a property of `area_m2` against one region's knowledge.
pub fn forecast(
  k: &RegionalKnowledge,
  property_type: PropertyType,
  area_m2: f64,
  season: Option<Season>,
) -> PerformancePrediction {
  let m = &k.market;
  let mut factor = 1.0;
  if let Some(p) = k.pattern(property_type) {
    factor *= 1.0 + p.premium_pct / 100.0;
  }
  let seasonal = season.and_then(|s| k.seasonal_adjustment(s));
  if let Some(s) = seasonal {
    factor *= 1.0 + s.price_adjustment_pct / 100.0;
  }
  let development: f64 = k
    .development_impacts
    .iter()
    .map(DevelopmentImpact::effective_impact_pct)
    .sum();
  factor *= 1.0 + development / 100.0;

  let price_per_m2 = m.average_price_per_m2 * factor;
  let estimate = price_per_m2 * area_m2;
  let band = m.price_volatility.max(MIN_PRICE_BAND_PCT) / 100.0;
  let expected_days_on_market = (m.days_on_market_samples > 0).then(|| {
    let adjustment = seasonal.map_or(0.0, |s| s.days_on_market_adjustment);
    (m.average_days_on_market + adjustment).max(0.0)
  });

  PerformancePrediction {
    region: k.region.clone(),
    price_low: estimate * (1.0 - band),
    price_estimate: estimate,
    price_high: estimate * (1.0 + band),
    price_per_m2,
    trend: trend_of(m.appreciation_rate),
    expected_days_on_market,
    investment_grade: m.investment_grade,
    risks: m.risk_factors.clone(),
    opportunities: m.opportunities.clone(),
    confidence: k.confidence,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::TimeZone;
  use tasa_core::{
    memory::MemoryStore,
    report::{Amenity, MarketTrend, Valuation},
  };

  use super::*;

  fn engine() -> RegionalIntelligence<MemoryStore> {
    RegionalIntelligence::new(
      Knowledge::new(Arc::new(MemoryStore::new())),
      LearningConfig::default(),
    )
  }

  fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 4, 10, 12, 0, 0).unwrap() }

  fn report(price: f64, area: f64, property_type: PropertyType) -> Report {
    Report {
      session_id:       "s".into(),
      property:         Property {
        address: "Calle Real 1".into(),
        city: "Marbella".into(),
        province: "Málaga".into(),
        neighborhood: Some("Nueva Andalucía".into()),
        property_type,
        area_m2: Some(area),
        ..Property::default()
      },
      valuation:        Some(Valuation {
        low:          price * 0.9,
        high:         price * 1.1,
        estimated:    price,
        confidence:   80.0,
        monthly_rent: None,
      }),
      market_trend:     None,
      comparables:      Vec::new(),
      amenities:        Vec::new(),
      developments:     Vec::new(),
      summary:          String::new(),
      investment_grade: None,
      data_quality:     None,
      methods:          Vec::new(),
      prompts:          Vec::new(),
      generated_at:     at(),
    }
  }

  #[tokio::test]
  async fn first_analysis_is_not_enough_to_predict() {
    let r = engine();
    let rep = report(300_000.0, 100.0, PropertyType::Apartment);
    let updated = r.learn_from_analysis(&rep, 75.0, at()).await;
    assert_eq!(updated.len(), 3);

    let city = r
      .knowledge_for(&RegionKey::new(Granularity::City, "marbella"))
      .await
      .unwrap();
    assert_eq!(city.market.average_price_per_m2, 3000.0);
    assert_eq!(city.data_points, 1);
    assert!(city.confidence <= 50.0);
    assert!(r.predict_property_performance(&rep.property, None).await.is_none());
  }

  #[tokio::test]
  async fn low_quality_reports_are_ignored() {
    let r = engine();
    let rep = report(300_000.0, 100.0, PropertyType::Apartment);
    assert!(r.learn_from_analysis(&rep, 10.0, at()).await.is_empty());
    assert!(r.summary().await.regions == 0);
  }

  #[tokio::test]
  async fn repeated_value_converges_and_predicts() {
    let r = engine();
    r.learn_from_analysis(&report(200_000.0, 100.0, PropertyType::Apartment), 80.0, at())
      .await;
    for _ in 0..200 {
      r.learn_from_analysis(&report(300_000.0, 100.0, PropertyType::Apartment), 80.0, at())
        .await;
    }
    let city = r
      .knowledge_for(&RegionKey::new(Granularity::City, "Marbella"))
      .await
      .unwrap();
    assert!((city.market.average_price_per_m2 - 3000.0).abs() < 10.0);
    assert_eq!(city.confidence, 70.0);

    let p = r
      .predict_property_performance(&report(0.0, 80.0, PropertyType::Apartment).property, None)
      .await
      .unwrap();
    assert_eq!(p.region.granularity, Granularity::Neighborhood);
    assert!(p.price_low < p.price_estimate && p.price_estimate < p.price_high);
    assert!((p.price_estimate - 80.0 * p.price_per_m2).abs() < 1e-6);
  }

  #[test]
  fn types_move_between_best_and_worst() {
    let now = at();
    let mut k = RegionalKnowledge::new(RegionKey::new(Granularity::City, "x"), "X", now);
    let obs = |t, price| AnalysisObservation {
      property_type:  t,
      area_m2:        Some(100.0),
      bedrooms:       None,
      price_per_m2:   Some(price),
      days_on_market: Some(20.0),
      appreciation:   None,
      rental_yield:   None,
      developments:   Vec::new(),
      amenities:      BTreeMap::new(),
      season:         Season::Spring,
    };
    apply_observation(&mut k, &obs(PropertyType::Apartment, 2000.0), now);
    apply_observation(&mut k, &obs(PropertyType::Villa, 4000.0), now);
    assert_eq!(k.market.best_performing_types, vec![PropertyType::Villa]);
    assert_eq!(k.market.worst_performing_types, vec![PropertyType::Apartment]);
    assert_eq!(k.market.inventory_level, Level::Low);
    assert_eq!(k.market.demand_level, Level::High);

    for _ in 0..6 {
      apply_observation(&mut k, &obs(PropertyType::Villa, 2000.0), now);
    }
    assert!(!k.market.best_performing_types.contains(&PropertyType::Villa));
    assert!(!k.market.worst_performing_types.contains(&PropertyType::Villa));
  }

  #[test]
  fn developments_are_deduplicated_and_bucketed() {
    let now = at();
    let mut k = RegionalKnowledge::new(RegionKey::new(Granularity::City, "x"), "X", now);
    let dev = |name: &str, km| FutureDevelopment {
      name:        name.into(),
      description: None,
      impact:      ImpactKind::Positive,
      distance_km: km,
    };
    let mut obs = AnalysisObservation::from_report(&report(300_000.0, 100.0, PropertyType::Villa));
    obs.developments = vec![dev("New Metro Line", 3.0)];
    apply_observation(&mut k, &obs, now);
    obs.developments = vec![dev("new  metro line", 0.3)];
    apply_observation(&mut k, &obs, now);

    assert_eq!(k.development_impacts.len(), 1);
    let d = &k.development_impacts[0];
    assert_eq!(d.observations, 2);
    assert_eq!(d.distance_bucket, DistanceBucket::Immediate);
    assert_eq!(d.effective_impact_pct(), 5.0);
    assert!(k.market.opportunities.iter().any(|o| o.contains("new metro line")));
  }

  #[test]
  fn investment_grade_rewards_strong_markets() {
    let strong = MarketCharacteristics {
      appreciation_rate: 10.0,
      appreciation_samples: 3,
      average_days_on_market: 20.0,
      days_on_market_samples: 3,
      rental_yield: Some(8.0),
      demand_level: Level::High,
      inventory_level: Level::Low,
      ..MarketCharacteristics::default()
    };
    assert_eq!(investment_score(&strong), 100.0);

    let weak = MarketCharacteristics {
      appreciation_rate: -6.0,
      appreciation_samples: 3,
      average_days_on_market: 150.0,
      days_on_market_samples: 3,
      rental_yield: Some(1.0),
      demand_level: Level::Low,
      inventory_level: Level::High,
      risk_factors: vec!["a".into(), "b".into()],
      ..MarketCharacteristics::default()
    };
    assert_eq!(
      InvestmentGrade::from_score(investment_score(&weak)),
      InvestmentGrade::F
    );
  }

  #[tokio::test]
  async fn patterns_and_insights() {
    let r = engine();
    let mut rep = report(300_000.0, 100.0, PropertyType::Apartment);
    rep.market_trend = Some(MarketTrend {
      direction:         Trend::Rising,
      yearly_change_pct: 8.0,
      days_on_market:    Some(150.0),
    });
    rep.amenities = vec![Amenity { name: "Beach".into(), kind: "beach".into(), distance_km: 0.4 }];
    for _ in 0..3 {
      r.learn_from_analysis(&rep, 80.0, at()).await;
    }

    let patterns = r.detect_market_patterns().await;
    assert_eq!(patterns.emerging_trends.len(), 3);
    assert_eq!(patterns.risks.len(), 3);
    assert!(patterns.opportunities.is_empty());

    let insights = r.regional_insights("Nueva Andalucia").await.unwrap();
    assert_eq!(insights.region.granularity, Granularity::Neighborhood);
    assert_eq!(insights.data_points, 3);
    assert_eq!(insights.market.inventory_level, Level::High);
    assert!(r.regional_insights("Atlantis").await.is_none());

    let city = r
      .knowledge_for(&RegionKey::new(Granularity::City, "marbella"))
      .await
      .unwrap();
    assert_eq!(city.demographics.len(), 3);
    assert_eq!(city.seasonal.len(), 1);
  }
}
