//! LocationLearner: address parsing, area relationships, urbanisation
//! patterns and geographic clusters.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tasa_core::{
  identity::normalize_name,
  location::{
    AddressComponents, AreaKind, ClusterSet, GeographicCluster, LocationRelationship,
    UrbanisationPattern,
  },
  report::Report,
  store::{KnowledgeStore, Record},
};

use crate::{config::LearningConfig, knowledge::Knowledge};

/// Relationship frequency at which confidence saturates.
const RELATIONSHIP_SATURATION: f64 = 5.0;
/// Urbanisation frequency at which confidence saturates.
const URBANISATION_SATURATION: f64 = 10.0;
const GRADUATED_RELATIONSHIP_CONFIDENCE: f64 = 0.8;
const GRADUATED_URBANISATION_FREQUENCY: u32 = 5;
const GRADUATED_CLUSTER_OBSERVATIONS: u32 = 5;

// ─── Dictionaries ────────────────────────────────────────────────────────────

// Stored normalised: lowercase, no diacritics.

pub const KNOWN_URBANISATIONS: &[&str] = &[
  "nueva andalucia",
  "la zagaleta",
  "sierra blanca",
  "los monteros",
  "guadalmina alta",
  "guadalmina baja",
  "el paraiso",
  "atalaya",
  "la quinta",
  "los flamingos",
  "el madronal",
  "las brisas",
  "aloha",
  "los naranjos",
  "marbella club",
  "la cerquilla",
  "cascada de camojan",
  "rio real",
  "los arqueros",
  "la alqueria",
  "sotogrande",
  "calahonda",
  "riviera del sol",
  "el rosario",
];

pub const KNOWN_SUBURBS: &[&str] = &[
  "golden mile",
  "puerto banus",
  "san pedro de alcantara",
  "nagueles",
  "elviria",
  "cancelada",
  "bel air",
  "las chapas",
  "la campana",
  "el limonar",
  "pedregalejo",
  "el palo",
  "la malagueta",
  "el candado",
  "cerrado de calderon",
  "teatinos",
  "el higueron",
  "la cala de mijas",
  "arroyo de la miel",
];

pub const KNOWN_CITIES: &[&str] = &[
  "marbella",
  "malaga",
  "estepona",
  "benahavis",
  "mijas",
  "fuengirola",
  "benalmadena",
  "torremolinos",
  "nerja",
  "ronda",
  "manilva",
  "casares",
  "sevilla",
  "granada",
  "cadiz",
  "almeria",
  "alicante",
  "valencia",
  "madrid",
  "barcelona",
];

// Patterns run against the normalised address.

static URBANISATION_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\b(?:urbanizacion|urbanisation|urbanization|urb\.?)\s+([a-z][a-z' -]*[a-z])")
    .expect("static regex")
});

static STREET_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"\b((?:calle|c/|avenida|avda\.?|av\.|paseo|plaza|camino|carretera|ctra\.?)\s*[a-z][a-z' -]*[a-z])",
  )
  .expect("static regex")
});

static POSTAL_CITY_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\b\d{5}\s+([a-z][a-z' -]*[a-z])").expect("static regex"));

fn contains_name(haystack: &str, name: &str) -> bool {
  format!(" {haystack} ").contains(&format!(" {name} "))
}

fn find_known(haystack: &str, names: &[&str]) -> Option<String> {
  names
    .iter()
    .filter(|n| contains_name(haystack, n))
    .max_by_key(|n| n.len())
    .map(|n| n.to_string())
}

/// A parsed address plus any non-canonical urbanisation spelling seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAddress {
  pub components:         AddressComponents,
  pub urbanisation_alias: Option<String>,
}

/// Map a captured urbanisation name onto a dictionary entry it contains.
fn canonical_urbanisation(captured: &str) -> (String, Option<String>) {
  match find_known(captured, KNOWN_URBANISATIONS) {
    Some(canonical) if canonical != captured => (canonical, Some(captured.to_string())),
    _ => (captured.to_string(), None),
  }
}

pub fn parse_address_detailed(address: &str, city_hint: Option<&str>) -> ParsedAddress {
  let flat = normalize_name(&address.replace(',', " , "));
  let segments: Vec<&str> = flat.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
  let spaced = segments.join(" ");

  let (urbanisation, urbanisation_alias) = match URBANISATION_RE
    .captures(&flat)
    .and_then(|c| c.get(1))
  {
    Some(m) => {
      let (canonical, alias) = canonical_urbanisation(m.as_str().trim());
      (Some(canonical), alias)
    }
    None => (find_known(&spaced, KNOWN_URBANISATIONS), None),
  };

  let street = STREET_RE
    .captures(&flat)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().trim().to_string());

  let suburb = find_known(&spaced, KNOWN_SUBURBS);

  let city = POSTAL_CITY_RE
    .captures(&flat)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().trim().to_string())
    .or_else(|| find_known(&spaced, KNOWN_CITIES))
    .or_else(|| city_hint.map(normalize_name).filter(|c| !c.is_empty()));

  ParsedAddress {
    components: AddressComponents { urbanisation, suburb, street, city },
    urbanisation_alias,
  }
}

/// Split `address` into urbanisation, suburb, street and city.
pub fn parse_address(address: &str, city_hint: Option<&str>) -> AddressComponents {
  parse_address_detailed(address, city_hint).components
}

// ─── Clusters ────────────────────────────────────────────────────────────────

/// Disjoint sets over area names.
#[derive(Debug, Default)]
struct UnionFind {
  parent: BTreeMap<String, String>,
}

impl UnionFind {
  fn find(&mut self, name: &str) -> String {
    let parent = self
      .parent
      .entry(name.to_string())
      .or_insert_with(|| name.to_string())
      .clone();
    if parent == name {
      return parent;
    }
    let root = self.find(&parent);
    self.parent.insert(name.to_string(), root.clone());
    root
  }

  fn union(&mut self, a: &str, b: &str) {
    let (ra, rb) = (self.find(a), self.find(b));
    if ra != rb {
      // Smaller name wins so the result does not depend on input order.
      let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
      self.parent.insert(child, root);
    }
  }
}

/// Merge every pair of clusters sharing at least one member. The result is
/// ordered by cluster id and does not depend on input order; merging an
/// already merged set changes nothing.
pub fn merge_clusters(clusters: Vec<GeographicCluster>) -> Vec<GeographicCluster> {
  let mut uf = UnionFind::default();
  for cluster in &clusters {
    let mut members = cluster.members.iter();
    if let Some(first) = members.next() {
      uf.find(first);
      for other in members {
        uf.union(first, other);
      }
    }
  }

  let mut groups: BTreeMap<String, Vec<GeographicCluster>> = BTreeMap::new();
  for cluster in clusters {
    let Some(first) = cluster.members.iter().next().cloned() else {
      continue;
    };
    groups.entry(uf.find(&first)).or_default().push(cluster);
  }

  let mut merged: Vec<GeographicCluster> = groups
    .into_values()
    .filter_map(|group| {
      let cluster_id = group.iter().map(|c| c.cluster_id.clone()).min()?;
      let center = group
        .iter()
        .max_by(|a, b| {
          a.observations
            .cmp(&b.observations)
            .then_with(|| b.center.cmp(&a.center))
        })
        .map(|c| c.center.clone())?;
      let last_updated = group.iter().map(|c| c.last_updated).max()?;
      Some(GeographicCluster {
        cluster_id,
        center,
        members: group.iter().flat_map(|c| c.members.iter().cloned()).collect(),
        observations: group.iter().map(|c| c.observations).sum(),
        last_updated,
      })
    })
    .collect();
  merged.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
  merged
}

// ─── Learner ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationLearning {
  pub subject:       AddressComponents,
  pub relationships: usize,
  pub urbanisations: usize,
  /// Id of the cluster the report's areas ended up in.
  pub cluster:       Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecayReport {
  pub relationships_removed: usize,
  pub urbanisations_removed: usize,
  pub clusters_removed:      usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStats {
  pub relationships:            usize,
  pub graduated_relationships:  usize,
  pub urbanisations:            usize,
  pub graduated_urbanisations:  usize,
  pub clusters:                 usize,
  pub largest_cluster:          Option<usize>,
}

pub struct LocationLearner<S> {
  knowledge: Knowledge<S>,
  config:    LearningConfig,
}

impl<S: KnowledgeStore> LocationLearner<S> {
  pub fn new(knowledge: Knowledge<S>, config: LearningConfig) -> Self {
    Self { knowledge, config }
  }

  pub async fn learn_from_report(&self, report: &Report, now: DateTime<Utc>) -> LocationLearning {
    let city = report.property.city.as_str();
    let mut subject = parse_address_detailed(&report.property.address, Some(city));
    if subject.components.suburb.is_none() {
      subject.components.suburb = report
        .property
        .neighborhood
        .as_deref()
        .map(normalize_name)
        .filter(|n| !n.is_empty());
    }
    let comparables: Vec<ParsedAddress> = report
      .comparables
      .iter()
      .map(|c| parse_address_detailed(&c.address, Some(city)))
      .collect();

    let mut urbanisations = 0;
    for parsed in std::iter::once(&subject).chain(&comparables) {
      if self.observe_urbanisation(parsed, now).await {
        urbanisations += 1;
      }
    }

    let mut relationships = 0;
    for target in &comparables {
      for kind in [AreaKind::Urbanisation, AreaKind::Suburb, AreaKind::City] {
        let (Some(source), Some(dest)) =
          (subject.components.get(kind), target.components.get(kind))
        else {
          continue;
        };
        if source == dest {
          continue;
        }
        if self.observe_relationship(kind, source, dest, now).await {
          relationships += 1;
        }
      }
    }

    let areas: BTreeSet<String> = std::iter::once(&subject)
      .chain(&comparables)
      .flat_map(|p| [p.components.urbanisation.clone(), p.components.suburb.clone()])
      .flatten()
      .collect();
    let cluster = if areas.len() >= 2 {
      let center = subject
        .components
        .urbanisation
        .clone()
        .or_else(|| subject.components.suburb.clone())
        .or_else(|| areas.iter().next().cloned());
      self.observe_cluster(areas, center, now).await
    } else {
      None
    };

    tracing::debug!(
      session = %report.session_id,
      relationships,
      urbanisations,
      cluster = cluster.as_deref().unwrap_or("-"),
      "location knowledge updated"
    );
    LocationLearning { subject: subject.components, relationships, urbanisations, cluster }
  }

  async fn observe_urbanisation(&self, parsed: &ParsedAddress, now: DateTime<Utc>) -> bool {
    let Some(name) = parsed.components.urbanisation.clone() else {
      return false;
    };
    let alias = parsed.urbanisation_alias.clone();
    let street = parsed.components.street.clone();
    let city = parsed.components.city.clone();
    let init_name = name.clone();
    self
      .knowledge
      .modify(
        name,
        move || UrbanisationPattern {
          name:          init_name,
          aliases:       BTreeSet::new(),
          known_streets: BTreeSet::new(),
          city:          None,
          frequency:     0,
          confidence:    0.0,
          first_seen:    now,
          last_seen:     now,
        },
        move |u: &mut UrbanisationPattern| {
          u.frequency += 1;
          u.confidence = (f64::from(u.frequency) / URBANISATION_SATURATION).min(1.0);
          u.aliases.extend(alias);
          u.known_streets.extend(street);
          if u.city.is_none() {
            u.city = city;
          }
          u.last_seen = now;
        },
      )
      .await
      .is_some()
  }

  async fn observe_relationship(
    &self,
    kind: AreaKind,
    source: &str,
    target: &str,
    now: DateTime<Utc>,
  ) -> bool {
    let (source, target) = (source.to_string(), target.to_string());
    self
      .knowledge
      .modify(
        LocationRelationship::key_for(kind, &source, &target),
        move || LocationRelationship {
          source,
          target,
          kind,
          frequency: 0,
          confidence: 0.0,
          first_seen: now,
          last_seen: now,
        },
        move |r: &mut LocationRelationship| {
          r.frequency += 1;
          r.confidence = (f64::from(r.frequency) / RELATIONSHIP_SATURATION).min(1.0);
          r.last_seen = now;
        },
      )
      .await
      .is_some()
  }

  /// Record one co-occurrence of `areas` and fold it into the stored
  /// clusters, merging any that now overlap.
  pub async fn observe_cluster(
    &self,
    areas: BTreeSet<String>,
    center: Option<String>,
    now: DateTime<Utc>,
  ) -> Option<String> {
    let first = areas.iter().next()?.clone();
    let observed = GeographicCluster {
      cluster_id: format!("cluster:{first}"),
      center: center.unwrap_or_else(|| first.clone()),
      members: areas,
      observations: 1,
      last_updated: now,
    };

    let set = self
      .knowledge
      .modify(ClusterSet::KEY.to_string(), ClusterSet::default, move |set: &mut ClusterSet| {
        let mut all = std::mem::take(&mut set.clusters);
        let before = all.len();
        all.push(observed);
        set.clusters = merge_clusters(all);
        if set.clusters.len() <= before {
          tracing::debug!(clusters = set.clusters.len(), "geographic clusters merged");
        }
      })
      .await?;
    set.containing(&first).map(|c| c.cluster_id.clone())
  }

  /// Drop ungraduated records unseen for the decay window. Staleness is
  /// rechecked against the stored record as it is removed, so anything
  /// observed meanwhile survives.
  pub async fn decay(&self, now: DateTime<Utc>) -> DecayReport {
    let cutoff = now - self.config.location_decay_window();
    let mut report = DecayReport::default();

    let stale_relationship = move |r: &LocationRelationship| {
      r.last_seen < cutoff && r.confidence < GRADUATED_RELATIONSHIP_CONFIDENCE
    };
    for r in self.knowledge.all::<LocationRelationship>().await {
      if stale_relationship(&r) && self.knowledge.remove_if(r.key(), stale_relationship).await {
        report.relationships_removed += 1;
      }
    }

    let stale_urbanisation = move |u: &UrbanisationPattern| {
      u.last_seen < cutoff && u.frequency < GRADUATED_URBANISATION_FREQUENCY
    };
    for u in self.knowledge.all::<UrbanisationPattern>().await {
      if stale_urbanisation(&u) && self.knowledge.remove_if(u.key(), stale_urbanisation).await {
        report.urbanisations_removed += 1;
      }
    }

    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    self
      .knowledge
      .modify_existing(ClusterSet::KEY.to_string(), move |set: &mut ClusterSet| {
        let before = set.clusters.len();
        set.clusters.retain(|c| {
          c.last_updated >= cutoff || c.observations >= GRADUATED_CLUSTER_OBSERVATIONS
        });
        counter.store(before - set.clusters.len(), Ordering::Relaxed);
      })
      .await;
    report.clusters_removed = removed.load(Ordering::Relaxed);

    tracing::info!(
      relationships = report.relationships_removed,
      urbanisations = report.urbanisations_removed,
      clusters = report.clusters_removed,
      "location decay pass complete"
    );
    report
  }

  /// Areas related to `area`, strongest first.
  pub async fn related_areas(&self, area: &str) -> Vec<LocationRelationship> {
    let area = normalize_name(area);
    let mut related: Vec<LocationRelationship> = self
      .knowledge
      .all::<LocationRelationship>()
      .await
      .into_iter()
      .filter(|r| r.source == area)
      .collect();
    related.sort_by(|a, b| {
      b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.target.cmp(&b.target))
    });
    related
  }

  /// Look up an urbanisation by canonical name or alias.
  pub async fn resolve_urbanisation(&self, name: &str) -> Option<UrbanisationPattern> {
    let name = normalize_name(name);
    if let Some(found) = self.knowledge.load::<UrbanisationPattern>(&name).await {
      return Some(found);
    }
    self
      .knowledge
      .all::<UrbanisationPattern>()
      .await
      .into_iter()
      .find(|u| u.aliases.contains(&name))
  }

  pub async fn cluster_for(&self, area: &str) -> Option<GeographicCluster> {
    let area = normalize_name(area);
    self.clusters().await.containing(&area).cloned()
  }

  pub async fn clusters(&self) -> ClusterSet {
    self.knowledge.load(ClusterSet::KEY).await.unwrap_or_default()
  }

  pub async fn stats(&self) -> LocationStats {
    let relationships: Vec<LocationRelationship> = self.knowledge.all().await;
    let urbanisations: Vec<UrbanisationPattern> = self.knowledge.all().await;
    let clusters = self.clusters().await.clusters;
    LocationStats {
      relationships:           relationships.len(),
      graduated_relationships: relationships
        .iter()
        .filter(|r| r.confidence >= GRADUATED_RELATIONSHIP_CONFIDENCE)
        .count(),
      urbanisations:           urbanisations.len(),
      graduated_urbanisations: urbanisations
        .iter()
        .filter(|u| u.frequency >= GRADUATED_URBANISATION_FREQUENCY)
        .count(),
      clusters:                clusters.len(),
      largest_cluster:         clusters.iter().map(|c| c.members.len()).max(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Duration;
  use pretty_assertions::assert_eq;
  use tasa_core::{
    memory::MemoryStore,
    report::{Comparable, Property},
  };

  use super::*;

  fn learner() -> LocationLearner<MemoryStore> {
    LocationLearner::new(
      Knowledge::new(Arc::new(MemoryStore::new())),
      LearningConfig::default(),
    )
  }

  fn cluster(id: &str, members: &[&str], observations: u32) -> GeographicCluster {
    GeographicCluster {
      cluster_id: id.to_string(),
      center: members[0].to_string(),
      members: members.iter().map(|m| m.to_string()).collect(),
      observations,
      last_updated: DateTime::<Utc>::UNIX_EPOCH,
    }
  }

  fn report(address: &str, comparables: &[&str]) -> Report {
    Report {
      session_id:       "s".into(),
      property:         Property {
        address: address.into(),
        city: "Marbella".into(),
        province: "Málaga".into(),
        ..Property::default()
      },
      valuation:        None,
      market_trend:     None,
      comparables:      comparables
        .iter()
        .map(|a| Comparable { address: a.to_string(), ..Comparable::default() })
        .collect(),
      amenities:        Vec::new(),
      developments:     Vec::new(),
      summary:          String::new(),
      investment_grade: None,
      data_quality:     None,
      methods:          Vec::new(),
      prompts:          Vec::new(),
      generated_at:     Utc::now(),
    }
  }

  #[test]
  fn parses_dictionary_and_pattern_components() {
    let c = parse_address("Calle Sierra Nevada 4, Urb. Nueva Andalucía, 29660 Marbella", None);
    assert_eq!(c.urbanisation.as_deref(), Some("nueva andalucia"));
    assert_eq!(c.street.as_deref(), Some("calle sierra nevada"));
    assert_eq!(c.city.as_deref(), Some("marbella"));

    let c = parse_address("Villa 12, Elviria", Some("Marbella"));
    assert_eq!(c.suburb.as_deref(), Some("elviria"));
    assert_eq!(c.city.as_deref(), Some("marbella"));
    assert!(c.urbanisation.is_none());
  }

  #[test]
  fn urbanisation_variants_resolve_to_canonical_name() {
    let parsed = parse_address_detailed("Urbanización La Zagaleta Golf, Benahavís", None);
    assert_eq!(parsed.components.urbanisation.as_deref(), Some("la zagaleta"));
    assert_eq!(parsed.urbanisation_alias.as_deref(), Some("la zagaleta golf"));
  }

  #[test]
  fn cluster_merge_is_commutative_and_idempotent() {
    let a = cluster("cluster:a", &["a", "b"], 2);
    let b = cluster("cluster:b", &["b", "c"], 1);
    let d = cluster("cluster:d", &["d", "e"], 1);

    let once = merge_clusters(vec![a.clone(), b.clone(), d.clone()]);
    let reversed = merge_clusters(vec![d, b, a]);
    assert_eq!(once, reversed);
    assert_eq!(once.len(), 2);
    assert_eq!(once[0].members.len(), 3);
    assert_eq!(once[0].cluster_id, "cluster:a");
    assert_eq!(once[0].observations, 3);

    let twice = merge_clusters(once.clone());
    assert_eq!(twice, once);
  }

  #[test]
  fn transitive_overlaps_collapse_into_one_cluster() {
    let merged = merge_clusters(vec![
      cluster("cluster:x", &["x", "y"], 1),
      cluster("cluster:p", &["p", "q"], 1),
      cluster("cluster:m", &["y", "p"], 1),
    ]);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].members.len(), 4);
  }

  #[tokio::test]
  async fn relationships_only_link_same_granularity() {
    let l = learner();
    let now = Utc::now();
    let r = report("Urb. Nueva Andalucia, Marbella", &[
      "Urb. Sierra Blanca, Marbella",
      "Elviria, Marbella",
    ]);
    let learned = l.learn_from_report(&r, now).await;
    assert_eq!(learned.relationships, 1);

    let related = l.related_areas("Nueva Andalucía").await;
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].target, "sierra blanca");
    assert_eq!(related[0].kind, AreaKind::Urbanisation);
    assert!((related[0].confidence - 0.2).abs() < 1e-9);

    let cluster = l.cluster_for("elviria").await.unwrap();
    assert!(cluster.members.contains("nueva andalucia"));
    assert_eq!(learned.cluster, Some(cluster.cluster_id));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_cluster_observations_are_all_counted() {
    let l = Arc::new(learner());
    let now = Utc::now();
    let handles: Vec<_> = (0..32)
      .map(|i| {
        let l = Arc::clone(&l);
        // Half the tasks see a third area, forcing merges along the way.
        let mut areas: BTreeSet<String> = ["alpha", "beta"].map(String::from).into();
        if i % 2 == 0 {
          areas.insert(format!("gamma{i}"));
        }
        tokio::spawn(async move { l.observe_cluster(areas, None, now).await })
      })
      .collect();
    for h in handles {
      assert_eq!(h.await.unwrap().as_deref(), Some("cluster:alpha"));
    }

    let set = l.clusters().await;
    assert_eq!(set.clusters.len(), 1);
    let cluster = l.cluster_for("alpha").await.unwrap();
    assert_eq!(cluster.observations, 32);
    assert_eq!(cluster.members.len(), 2 + 16);
  }

  #[tokio::test]
  async fn overlapping_observations_merge_into_one_cluster() {
    let l = learner();
    let now = Utc::now();
    let areas = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>();

    l.observe_cluster(areas(&["a", "b"]), None, now).await;
    l.observe_cluster(areas(&["x", "y"]), None, now).await;
    assert_eq!(l.stats().await.clusters, 2);

    let id = l.observe_cluster(areas(&["b", "x"]), None, now).await;
    assert_eq!(id.as_deref(), Some("cluster:a"));
    let stats = l.stats().await;
    assert_eq!(stats.clusters, 1);
    assert_eq!(stats.largest_cluster, Some(4));
    assert_eq!(l.cluster_for("y").await.map(|c| c.observations), Some(3));
  }

  #[tokio::test]
  async fn decay_keeps_records_refreshed_after_the_scan() {
    let l = learner();
    let old = Utc::now() - Duration::days(60);
    l.learn_from_report(&report("Urb. Aloha", &["Urb. Atalaya"]), old).await;

    // Refreshed between a decay pass reading the collection and removing.
    let now = Utc::now();
    let key = LocationRelationship::key_for(AreaKind::Urbanisation, "aloha", "atalaya");
    let cutoff = now - LearningConfig::default().location_decay_window();
    let scanned: Vec<LocationRelationship> = l.knowledge.all().await;
    assert!(scanned.iter().all(|r| r.last_seen < cutoff));
    l.learn_from_report(&report("Urb. Aloha", &["Urb. Atalaya"]), now).await;

    let removed = l
      .knowledge
      .remove_if(key.clone(), move |r: &LocationRelationship| r.last_seen < cutoff)
      .await;
    assert!(!removed);
    assert!(l.knowledge.load::<LocationRelationship>(&key).await.is_some());

    let decayed = l.decay(now).await;
    assert_eq!(decayed, DecayReport::default());
    assert_eq!(l.related_areas("aloha").await.len(), 1);
  }

  #[tokio::test]
  async fn decay_drops_small_stale_clusters() {
    let l = learner();
    let old = Utc::now() - Duration::days(60);
    let areas = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>();
    l.observe_cluster(areas(&["a", "b"]), None, old).await;
    for _ in 0..5 {
      l.observe_cluster(areas(&["x", "y"]), None, old).await;
    }

    let decayed = l.decay(Utc::now()).await;
    assert_eq!(decayed.clusters_removed, 1);
    assert!(l.cluster_for("a").await.is_none());
    assert_eq!(l.cluster_for("x").await.map(|c| c.observations), Some(5));
  }

  #[tokio::test]
  async fn decay_spares_graduated_records() {
    let l = learner();
    let start = Utc::now() - Duration::days(60);
    let frequent = report("Urb. Los Monteros", &["Urb. Rio Real"]);
    for _ in 0..5 {
      l.learn_from_report(&frequent, start).await;
    }
    l.learn_from_report(&report("Urb. Aloha", &["Urb. Atalaya"]), start).await;

    let decayed = l.decay(Utc::now()).await;
    assert_eq!(decayed.relationships_removed, 1);
    assert_eq!(decayed.urbanisations_removed, 2);

    assert!(l.resolve_urbanisation("los monteros").await.is_some());
    assert!(l.resolve_urbanisation("aloha").await.is_none());
    assert_eq!(l.related_areas("los monteros").await.len(), 1);
  }
}
