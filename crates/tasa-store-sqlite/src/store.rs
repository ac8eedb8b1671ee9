//! [`SqliteStore`] — the SQLite implementation of [`KnowledgeStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use serde_json::Value;

use tasa_core::store::{Collection, KnowledgeStore, UpdateFn};

use crate::{
  Error, Result,
  encode::{RawRecord, encode_dt, encode_value},
  schema::SCHEMA,
};

const UPSERT: &str = "
  INSERT INTO records (collection, record_key, value_json, updated_at)
  VALUES (?1, ?2, ?3, ?4)
  ON CONFLICT (collection, record_key)
  DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at";

/// Box a non-SQLite error so it can cross the connection-thread boundary.
fn other<E>(e: E) -> tokio_rusqlite::Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  tokio_rusqlite::Error::Other(Box::new(e))
}

/// Recover errors raised by an [`UpdateFn`] as [`Error::Core`].
fn lift(e: tokio_rusqlite::Error) -> Error {
  match e {
    tokio_rusqlite::Error::Other(inner) => match inner.downcast::<tasa_core::Error>() {
      Ok(core) => Error::Core(*core),
      Err(inner) => Error::Database(tokio_rusqlite::Error::Other(inner)),
    },
    e => Error::Database(e),
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A tasa knowledge store backed by a single SQLite file.
///
/// Clones share the inner reference-counted connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("sqlite knowledge store schema ready");
    Ok(())
  }

  /// Number of records in `collection`.
  pub async fn count(&self, collection: Collection) -> Result<usize> {
    let name = collection.as_str();
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM records WHERE collection = ?1",
          rusqlite::params![name],
          |row| row.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(n).unwrap_or_default())
  }
}

// ─── KnowledgeStore impl ─────────────────────────────────────────────────────

impl KnowledgeStore for SqliteStore {
  type Error = Error;

  async fn get(&self, collection: Collection, key: String) -> Result<Option<Value>> {
    let name = collection.as_str();

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT record_key, value_json FROM records
               WHERE collection = ?1 AND record_key = ?2",
              rusqlite::params![name, key],
              |row| {
                Ok(RawRecord {
                  record_key: row.get(0)?,
                  value_json: row.get(1)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_pair().map(|(_, v)| v)).transpose()
  }

  async fn put(&self, collection: Collection, key: String, value: Value) -> Result<()> {
    let name = collection.as_str();
    let json = encode_value(&value)?;
    let at = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(UPSERT, rusqlite::params![name, key, json, at])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete(&self, collection: Collection, key: String) -> Result<bool> {
    let name = collection.as_str();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
          rusqlite::params![name, key],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>> {
    let name = collection.as_str();

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT record_key, value_json FROM records
           WHERE collection = ?1
           ORDER BY record_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![name], |row| {
            Ok(RawRecord {
              record_key: row.get(0)?,
              value_json: row.get(1)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_pair).collect()
  }

  async fn update(
    &self,
    collection: Collection,
    key:        String,
    apply:      UpdateFn,
  ) -> Result<Option<Value>> {
    let name = collection.as_str();
    let at = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
          .query_row(
            "SELECT value_json FROM records WHERE collection = ?1 AND record_key = ?2",
            rusqlite::params![name, key],
            |row| row.get(0),
          )
          .optional()?;
        let current = current
          .map(|s| serde_json::from_str::<Value>(&s))
          .transpose()
          .map_err(other)?;

        let next = apply(current).map_err(other)?;
        match &next {
          Some(value) => {
            let json = serde_json::to_string(value).map_err(other)?;
            tx.execute(UPSERT, rusqlite::params![name, key, json, at])?;
          }
          None => {
            tx.execute(
              "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
              rusqlite::params![name, key],
            )?;
          }
        }
        tx.commit()?;
        Ok(next)
      })
      .await
      .map_err(lift)
  }
}
