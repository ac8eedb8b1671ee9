//! Location knowledge: address components, area relationships, urbanisation
//! patterns and geographic clusters.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::store::{Collection, Record};

/// Granularity of a named area, finest first.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AreaKind {
  Street,
  Urbanisation,
  Suburb,
  City,
}

/// The components recognised in one address. All names are normalised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressComponents {
  pub urbanisation: Option<String>,
  pub suburb:       Option<String>,
  pub street:       Option<String>,
  pub city:         Option<String>,
}

impl AddressComponents {
  pub fn get(&self, kind: AreaKind) -> Option<&str> {
    match kind {
      AreaKind::Street => self.street.as_deref(),
      AreaKind::Urbanisation => self.urbanisation.as_deref(),
      AreaKind::Suburb => self.suburb.as_deref(),
      AreaKind::City => self.city.as_deref(),
    }
  }

  /// Every recognised (kind, name) pair, finest first.
  pub fn areas(&self) -> Vec<(AreaKind, &str)> {
    [AreaKind::Street, AreaKind::Urbanisation, AreaKind::Suburb, AreaKind::City]
      .into_iter()
      .filter_map(|k| self.get(k).map(|n| (k, n)))
      .collect()
  }

  /// The most specific area that is not a street.
  pub fn primary_area(&self) -> Option<&str> {
    self
      .urbanisation
      .as_deref()
      .or(self.suburb.as_deref())
      .or(self.city.as_deref())
  }

  pub fn is_empty(&self) -> bool { self.areas().is_empty() }
}

// ─── Relationships ───────────────────────────────────────────────────────────

/// A directed co-occurrence edge between two areas of the same kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRelationship {
  pub source:     String,
  pub target:     String,
  pub kind:       AreaKind,
  pub frequency:  u32,
  /// 0–1, `min(1, frequency / 5)`.
  pub confidence: f64,
  pub first_seen: DateTime<Utc>,
  pub last_seen:  DateTime<Utc>,
}

impl LocationRelationship {
  pub fn key_for(kind: AreaKind, source: &str, target: &str) -> String {
    format!("{kind}:{source}->{target}")
  }
}

impl Record for LocationRelationship {
  const COLLECTION: Collection = Collection::LocationRelationships;

  fn key(&self) -> String { Self::key_for(self.kind, &self.source, &self.target) }
}

// ─── Urbanisations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrbanisationPattern {
  /// Canonical normalised name.
  pub name:          String,
  /// Other spellings seen for the same urbanisation.
  pub aliases:       BTreeSet<String>,
  pub known_streets: BTreeSet<String>,
  pub city:          Option<String>,
  pub frequency:     u32,
  /// 0–1, `min(1, frequency / 10)`.
  pub confidence:    f64,
  pub first_seen:    DateTime<Utc>,
  pub last_seen:     DateTime<Utc>,
}

impl Record for UrbanisationPattern {
  const COLLECTION: Collection = Collection::UrbanisationPatterns;

  fn key(&self) -> String { self.name.clone() }
}

// ─── Clusters ────────────────────────────────────────────────────────────────

/// A group of areas that repeatedly appear together in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographicCluster {
  pub cluster_id:   String,
  pub center:       String,
  pub members:      BTreeSet<String>,
  pub observations: u32,
  pub last_updated: DateTime<Utc>,
}

/// Every known cluster, held in a single record so that an observation and
/// the merges it causes commit together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSet {
  /// Disjoint clusters ordered by id.
  pub clusters: Vec<GeographicCluster>,
}

impl ClusterSet {
  pub const KEY: &'static str = "clusters";

  /// The cluster `area` belongs to, if any.
  pub fn containing(&self, area: &str) -> Option<&GeographicCluster> {
    self.clusters.iter().find(|c| c.members.contains(area))
  }
}

impl Record for ClusterSet {
  const COLLECTION: Collection = Collection::GeographicClusters;

  fn key(&self) -> String { Self::KEY.to_string() }
}
