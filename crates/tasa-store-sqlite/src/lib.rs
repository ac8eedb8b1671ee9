//! SQLite backend for the tasa knowledge store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! connection thread without blocking the async runtime. That thread is the
//! single writer: every [`update`](tasa_core::store::KnowledgeStore::update)
//! runs as one immediate transaction on it.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
