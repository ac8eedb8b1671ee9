//! Whole-collection JSON snapshots.
//!
//! A snapshot is a pretty-printed JSON array of the records of one
//! collection, ordered by key. Importing decodes each element as the
//! collection's record type and re-derives its key, so snapshots carry no
//! storage-specific framing.

use serde_json::Value;

use crate::{
  Error, Result,
  comparable::ComparableIntelligence,
  feedback::Feedback,
  history::AnalysisHistory,
  location::{ClusterSet, LocationRelationship, UrbanisationPattern},
  prediction::{Prediction, PredictionValidation},
  prompt::{AbTest, PromptOptimization, PromptPerformance},
  region::RegionalKnowledge,
  store::{Collection, KnowledgeStore, Record},
};

/// Serialise every record of `collection` as a pretty-printed JSON array.
pub async fn export_collection<S: KnowledgeStore>(
  store: &S,
  collection: Collection,
) -> Result<String> {
  let records: Vec<Value> = store
    .list(collection)
    .await
    .map_err(Error::store)?
    .into_iter()
    .map(|(_, v)| v)
    .collect();
  Ok(serde_json::to_string_pretty(&records)?)
}

async fn import_as<R: Record, S: KnowledgeStore>(store: &S, json: &str) -> Result<usize> {
  let records: Vec<R> = serde_json::from_str(json)?;
  let count = records.len();
  for record in records {
    let value = serde_json::to_value(&record)?;
    store
      .put(R::COLLECTION, record.key(), value)
      .await
      .map_err(Error::store)?;
  }
  Ok(count)
}

/// Load a snapshot produced by [`export_collection`]. Existing records with
/// the same key are replaced. Returns the number of records written.
pub async fn import_collection<S: KnowledgeStore>(
  store: &S,
  collection: Collection,
  json: &str,
) -> Result<usize> {
  match collection {
    Collection::UserFeedback => import_as::<Feedback, _>(store, json).await,
    Collection::MarketPredictions => import_as::<Prediction, _>(store, json).await,
    Collection::PredictionValidations => {
      import_as::<PredictionValidation, _>(store, json).await
    }
    Collection::RegionalKnowledge => import_as::<RegionalKnowledge, _>(store, json).await,
    Collection::ComparableIntelligence => {
      import_as::<ComparableIntelligence, _>(store, json).await
    }
    Collection::LocationRelationships => {
      import_as::<LocationRelationship, _>(store, json).await
    }
    Collection::UrbanisationPatterns => {
      import_as::<UrbanisationPattern, _>(store, json).await
    }
    Collection::GeographicClusters => import_as::<ClusterSet, _>(store, json).await,
    Collection::PromptPerformance => import_as::<PromptPerformance, _>(store, json).await,
    Collection::PromptOptimizations => {
      import_as::<PromptOptimization, _>(store, json).await
    }
    Collection::AbTests => import_as::<AbTest, _>(store, json).await,
    Collection::AnalysisHistory => import_as::<AnalysisHistory, _>(store, json).await,
  }
}
