//! The `KnowledgeStore` trait and the typed [`Record`] contract.
//!
//! Every learning component persists its state as a keyed map of JSON
//! records inside a named [`Collection`]. Backends only see opaque
//! `serde_json::Value`s; the typed layer lives in the [`Record`] trait.

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ─── Collections ─────────────────────────────────────────────────────────────

/// The named record collections. The kebab-case name is used as the storage
/// discriminant and as the snapshot file stem.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Display,
  EnumIter,
  EnumString,
  IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Collection {
  UserFeedback,
  MarketPredictions,
  PredictionValidations,
  RegionalKnowledge,
  ComparableIntelligence,
  LocationRelationships,
  UrbanisationPatterns,
  GeographicClusters,
  PromptPerformance,
  PromptOptimizations,
  AbTests,
  AnalysisHistory,
}

impl Collection {
  pub fn as_str(self) -> &'static str { self.into() }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A persisted knowledge record. The key must be stable for the lifetime of
/// the record: updates are addressed by it.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
  const COLLECTION: Collection;

  fn key(&self) -> String;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A read-modify-write step applied atomically by [`KnowledgeStore::update`].
///
/// Receives the current value (if any) and returns the value to persist, or
/// `None` to leave the key absent, deleting the current value.
pub type UpdateFn = Box<
  dyn FnOnce(Option<Value>) -> crate::Result<Option<Value>> + Send + 'static,
>;

/// Abstraction over a keyed knowledge backend.
///
/// Implementations must make [`update`](KnowledgeStore::update) atomic with
/// respect to every other mutation on the same store, so concurrent learners
/// never lose each other's writes.
pub trait KnowledgeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch a single record. Returns `None` if the key is absent.
  fn get(
    &self,
    collection: Collection,
    key: String,
  ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send + '_;

  /// Insert or replace a record.
  fn put(
    &self,
    collection: Collection,
    key: String,
    value: Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remove a record. Returns `true` if something was deleted.
  fn delete(
    &self,
    collection: Collection,
    key: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// All records of a collection, ordered by key.
  fn list(
    &self,
    collection: Collection,
  ) -> impl Future<Output = Result<Vec<(String, Value)>, Self::Error>> + Send + '_;

  /// Atomically read, transform and write back one record, returning the
  /// persisted value (`None` when the step left the key absent).
  fn update(
    &self,
    collection: Collection,
    key: String,
    apply: UpdateFn,
  ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send + '_;
}

// ─── Typed helpers ───────────────────────────────────────────────────────────

/// Build an [`UpdateFn`] that decodes the current value as `R` (or creates it
/// with `init`), applies `f`, and re-encodes it.
pub fn typed_update<R, I, F>(init: I, f: F) -> UpdateFn
where
  R: Record,
  I: FnOnce() -> R + Send + 'static,
  F: FnOnce(&mut R) + Send + 'static,
{
  Box::new(move |current| {
    let mut record: R = match current {
      Some(value) => serde_json::from_value(value)?,
      None => init(),
    };
    f(&mut record);
    Ok(Some(serde_json::to_value(&record)?))
  })
}

/// Build an [`UpdateFn`] that applies `f` to an existing `R` and leaves an
/// absent key absent.
pub fn typed_update_existing<R, F>(f: F) -> UpdateFn
where
  R: Record,
  F: FnOnce(&mut R) + Send + 'static,
{
  Box::new(move |current| {
    let Some(value) = current else {
      return Ok(None);
    };
    let mut record: R = serde_json::from_value(value)?;
    f(&mut record);
    Ok(Some(serde_json::to_value(&record)?))
  })
}

/// Build an [`UpdateFn`] that deletes the current `R` when `remove` holds
/// for it and otherwise keeps it unchanged.
pub fn typed_remove_if<R, P>(remove: P) -> UpdateFn
where
  R: Record,
  P: FnOnce(&R) -> bool + Send + 'static,
{
  Box::new(move |current| {
    let Some(value) = current else {
      return Ok(None);
    };
    let record: R = serde_json::from_value(value.clone())?;
    Ok((!remove(&record)).then_some(value))
  })
}

/// Decode a raw value into `R`.
pub fn decode<R: Record>(value: Value) -> crate::Result<R> {
  Ok(serde_json::from_value(value)?)
}

/// Encode `R` for storage.
pub fn encode<R: Record>(record: &R) -> crate::Result<Value> {
  Ok(serde_json::to_value(record)?)
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn collection_names_round_trip() {
    for collection in Collection::iter() {
      let parsed = Collection::from_str(collection.as_str()).unwrap();
      assert_eq!(parsed, collection);
    }
    assert_eq!(Collection::UserFeedback.as_str(), "user-feedback");
    assert_eq!(Collection::AbTests.as_str(), "ab-tests");
  }
}
