//! [`Knowledge`] — the typed, failure-tolerant view of a [`KnowledgeStore`]
//! shared by every learning component.
//!
//! Storage failures never reach the caller: reads degrade to "nothing known"
//! and writes are dropped, each with a `warn!` naming the collection and key.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use tasa_core::store::{
  KnowledgeStore, Record, UpdateFn, decode, encode, typed_remove_if, typed_update,
  typed_update_existing,
};

pub struct Knowledge<S> {
  store: Arc<S>,
}

impl<S> Clone for Knowledge<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: KnowledgeStore> Knowledge<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Fetch one record, or `None` when absent or unreadable.
  pub async fn load<R: Record>(&self, key: &str) -> Option<R> {
    let value = match self.store.get(R::COLLECTION, key.to_string()).await {
      Ok(value) => value?,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "knowledge read failed: {e}");
        return None;
      }
    };
    match decode::<R>(value) {
      Ok(record) => Some(record),
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "undecodable record: {e}");
        None
      }
    }
  }

  /// Every decodable record of `R`'s collection, ordered by key.
  pub async fn all<R: Record>(&self) -> Vec<R> {
    let rows = match self.store.list(R::COLLECTION).await {
      Ok(rows) => rows,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, "knowledge scan failed: {e}");
        return Vec::new();
      }
    };
    rows
      .into_iter()
      .filter_map(|(key, value)| match decode::<R>(value) {
        Ok(record) => Some(record),
        Err(e) => {
          tracing::warn!(collection = %R::COLLECTION, key = %key, "skipping undecodable record: {e}");
          None
        }
      })
      .collect()
  }

  /// Insert or replace `record`. Returns whether the write landed.
  pub async fn save<R: Record>(&self, record: &R) -> bool {
    let key = record.key();
    let value = match encode(record) {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "unencodable record: {e}");
        return false;
      }
    };
    match self.store.put(R::COLLECTION, key.clone(), value).await {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "knowledge write dropped: {e}");
        false
      }
    }
  }

  /// Atomically apply `f` to the record at `key`, creating it with `init`
  /// when absent. Returns the persisted record.
  pub async fn modify<R, I, F>(&self, key: String, init: I, f: F) -> Option<R>
  where
    R: Record,
    I: FnOnce() -> R + Send + 'static,
    F: FnOnce(&mut R) + Send + 'static,
  {
    self.apply::<R>(key, typed_update(init, f)).await
  }

  /// Atomically apply `f` only if a record already exists at `key`. An absent
  /// record stays absent and yields `None`.
  pub async fn modify_existing<R, F>(&self, key: String, f: F) -> Option<R>
  where
    R: Record,
    F: FnOnce(&mut R) + Send + 'static,
  {
    self.apply::<R>(key, typed_update_existing(f)).await
  }

  /// Atomically delete the record at `key` if `stale` holds for its current
  /// value. Returns whether it was removed.
  pub async fn remove_if<R, P>(&self, key: String, stale: P) -> bool
  where
    R: Record,
    P: FnOnce(&R) -> bool + Send + 'static,
  {
    let removed = Arc::new(AtomicBool::new(false));
    let hit = Arc::clone(&removed);
    let step = typed_remove_if(move |record: &R| {
      let remove = stale(record);
      hit.store(remove, Ordering::Relaxed);
      remove
    });
    match self.store.update(R::COLLECTION, key.clone(), step).await {
      Ok(_) => removed.load(Ordering::Relaxed),
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "knowledge delete dropped: {e}");
        false
      }
    }
  }

  async fn apply<R: Record>(&self, key: String, step: UpdateFn) -> Option<R> {
    let value = match self.store.update(R::COLLECTION, key.clone(), step).await {
      Ok(value) => value?,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "knowledge update dropped: {e}");
        return None;
      }
    };
    match decode::<R>(value) {
      Ok(record) => Some(record),
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "undecodable update result: {e}");
        None
      }
    }
  }

  /// Delete the record of `R` at `key`. Returns whether something was removed.
  pub async fn remove<R: Record>(&self, key: &str) -> bool {
    match self.store.delete(R::COLLECTION, key.to_string()).await {
      Ok(removed) => removed,
      Err(e) => {
        tracing::warn!(collection = %R::COLLECTION, key = %key, "knowledge delete dropped: {e}");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::future::Future;

  use serde_json::Value;
  use tasa_core::{
    feedback::Feedback,
    memory::MemoryStore,
    store::{Collection, UpdateFn},
  };

  use super::*;

  /// A store whose every operation fails.
  struct BrokenStore;

  #[derive(Debug)]
  struct Unavailable;

  impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str("storage unavailable")
    }
  }

  impl std::error::Error for Unavailable {}

  impl KnowledgeStore for BrokenStore {
    type Error = Unavailable;

    fn get(
      &self,
      _: Collection,
      _: String,
    ) -> impl Future<Output = Result<Option<Value>, Unavailable>> + Send + '_ {
      async { Err(Unavailable) }
    }

    fn put(
      &self,
      _: Collection,
      _: String,
      _: Value,
    ) -> impl Future<Output = Result<(), Unavailable>> + Send + '_ {
      async { Err(Unavailable) }
    }

    fn delete(
      &self,
      _: Collection,
      _: String,
    ) -> impl Future<Output = Result<bool, Unavailable>> + Send + '_ {
      async { Err(Unavailable) }
    }

    fn list(
      &self,
      _: Collection,
    ) -> impl Future<Output = Result<Vec<(String, Value)>, Unavailable>> + Send + '_ {
      async { Err(Unavailable) }
    }

    fn update(
      &self,
      _: Collection,
      _: String,
      _: UpdateFn,
    ) -> impl Future<Output = Result<Option<Value>, Unavailable>> + Send + '_ {
      async { Err(Unavailable) }
    }
  }

  #[tokio::test]
  async fn storage_failures_degrade_to_empty() {
    let k = Knowledge::new(Arc::new(BrokenStore));
    let fb = Feedback::new("s", 4);

    assert!(!k.save(&fb).await);
    assert!(k.load::<Feedback>(&fb.key()).await.is_none());
    assert!(k.all::<Feedback>().await.is_empty());
    assert!(k.modify(fb.key(), move || fb, |_: &mut Feedback| {}).await.is_none());
    assert!(!k.remove::<Feedback>("x").await);
    assert!(!k.remove_if("x".to_string(), |_: &Feedback| true).await);
  }

  #[tokio::test]
  async fn modify_existing_skips_absent_records() {
    let k = Knowledge::new(Arc::new(MemoryStore::new()));
    let touched = k
      .modify_existing("missing".to_string(), |f: &mut Feedback| f.overall_rating = 1)
      .await;
    assert!(touched.is_none());
    assert!(k.all::<Feedback>().await.is_empty());
  }

  #[tokio::test]
  async fn removed_record_is_not_resurrected() {
    let k = Knowledge::new(Arc::new(MemoryStore::new()));
    let fb = Feedback::new("s", 3);
    let key = fb.key();
    assert!(k.save(&fb).await);

    // Removal lands between a reader's view and its modification.
    let seen = k.load::<Feedback>(&key).await;
    assert!(seen.is_some());
    assert!(k.remove::<Feedback>(&key).await);
    let touched = k
      .modify_existing(key.clone(), |f: &mut Feedback| f.overall_rating = 1)
      .await;

    assert!(touched.is_none());
    assert!(k.load::<Feedback>(&key).await.is_none());
  }

  #[tokio::test]
  async fn remove_if_checks_the_current_record() {
    let k = Knowledge::new(Arc::new(MemoryStore::new()));
    let fb = Feedback::new("s", 2);
    let key = fb.key();
    assert!(k.save(&fb).await);

    // A stale view said "low rating"; a newer write raised it first.
    let stale_view = k.load::<Feedback>(&key).await.unwrap();
    assert_eq!(stale_view.overall_rating, 2);
    k.modify_existing(key.clone(), |f: &mut Feedback| f.overall_rating = 5).await;

    assert!(!k.remove_if(key.clone(), |f: &Feedback| f.overall_rating < 3).await);
    assert_eq!(k.load::<Feedback>(&key).await.map(|f| f.overall_rating), Some(5));

    assert!(k.remove_if(key.clone(), |f: &Feedback| f.overall_rating == 5).await);
    assert!(k.load::<Feedback>(&key).await.is_none());
    assert!(!k.remove_if(key, |_: &Feedback| true).await);
  }

  #[tokio::test]
  async fn undecodable_rows_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    store
      .put(Collection::UserFeedback, "junk".into(), serde_json::json!({"x": 1}))
      .await
      .unwrap();
    let k = Knowledge::new(Arc::clone(&store));
    let fb = Feedback::new("s", 5);
    assert!(k.save(&fb).await);

    let all = k.all::<Feedback>().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].feedback_id, fb.feedback_id);
  }
}
