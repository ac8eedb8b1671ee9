//! [`MemoryStore`] — an in-process [`KnowledgeStore`] for tests and
//! throwaway sessions.

use std::{
  collections::BTreeMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;

use crate::{
  Error, Result,
  store::{Collection, KnowledgeStore, UpdateFn},
};

type Map = BTreeMap<(Collection, String), Value>;

/// A [`KnowledgeStore`] held entirely in memory behind a mutex.
///
/// `update` runs under the lock, so mutations are serialised exactly as they
/// would be by a single-writer backend.
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<Map>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Map> {
    self.records.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Number of records across all collections.
  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.lock().is_empty() }
}

impl KnowledgeStore for MemoryStore {
  type Error = Error;

  async fn get(&self, collection: Collection, key: String) -> Result<Option<Value>> {
    Ok(self.lock().get(&(collection, key)).cloned())
  }

  async fn put(&self, collection: Collection, key: String, value: Value) -> Result<()> {
    self.lock().insert((collection, key), value);
    Ok(())
  }

  async fn delete(&self, collection: Collection, key: String) -> Result<bool> {
    Ok(self.lock().remove(&(collection, key)).is_some())
  }

  async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>> {
    Ok(
      self
        .lock()
        .iter()
        .filter(|((c, _), _)| *c == collection)
        .map(|((_, k), v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  async fn update(
    &self,
    collection: Collection,
    key:        String,
    apply:      UpdateFn,
  ) -> Result<Option<Value>> {
    let mut records = self.lock();
    let slot = (collection, key);
    match apply(records.get(&slot).cloned())? {
      Some(next) => {
        records.insert(slot, next.clone());
        Ok(Some(next))
      }
      None => {
        records.remove(&slot);
        Ok(None)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[tokio::test]
  async fn put_get_delete() {
    let store = MemoryStore::new();
    store
      .put(Collection::AbTests, "t1".into(), json!({ "a": 1 }))
      .await
      .unwrap();

    let got = store.get(Collection::AbTests, "t1".into()).await.unwrap();
    assert_eq!(got, Some(json!({ "a": 1 })));

    // Same key in another collection is independent.
    let other = store.get(Collection::UserFeedback, "t1".into()).await.unwrap();
    assert!(other.is_none());

    assert!(store.delete(Collection::AbTests, "t1".into()).await.unwrap());
    assert!(!store.delete(Collection::AbTests, "t1".into()).await.unwrap());
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn update_creates_then_modifies() {
    let store = MemoryStore::new();
    let bump: fn() -> UpdateFn = || {
      Box::new(|current| {
        let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(Some(json!(n + 1)))
      })
    };

    store.update(Collection::AbTests, "n".into(), bump()).await.unwrap();
    let v = store.update(Collection::AbTests, "n".into(), bump()).await.unwrap();
    assert_eq!(v, Some(json!(2)));
  }

  #[tokio::test]
  async fn update_returning_none_deletes() {
    let store = MemoryStore::new();
    let clear: fn() -> UpdateFn =
      || Box::new(|_: Option<Value>| -> Result<Option<Value>> { Ok(None) });
    store
      .put(Collection::AbTests, "k".into(), json!(1))
      .await
      .unwrap();

    let v = store
      .update(Collection::AbTests, "k".into(), clear())
      .await
      .unwrap();
    assert!(v.is_none());
    assert!(store.is_empty());

    // An absent key stays absent.
    store
      .update(Collection::AbTests, "k".into(), clear())
      .await
      .unwrap();
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn failed_update_leaves_record_untouched() {
    let store = MemoryStore::new();
    store
      .put(Collection::AbTests, "k".into(), json!("keep"))
      .await
      .unwrap();

    let result = store
      .update(
        Collection::AbTests,
        "k".into(),
        Box::new(|_| Err(Error::UnknownCollection("boom".into()))),
      )
      .await;
    assert!(result.is_err());

    let got = store.get(Collection::AbTests, "k".into()).await.unwrap();
    assert_eq!(got, Some(json!("keep")));
  }

  #[tokio::test]
  async fn list_is_ordered_by_key() {
    let store = MemoryStore::new();
    for k in ["b", "c", "a"] {
      store
        .put(Collection::UserFeedback, k.into(), json!(k))
        .await
        .unwrap();
    }
    let keys: Vec<String> = store
      .list(Collection::UserFeedback)
      .await
      .unwrap()
      .into_iter()
      .map(|(k, _)| k)
      .collect();
    assert_eq!(keys, ["a", "b", "c"]);
  }
}
