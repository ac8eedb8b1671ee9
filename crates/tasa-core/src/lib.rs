//! Core types and trait definitions for the tasa regional-learning subsystem.
//!
//! This crate holds the persisted knowledge records, the inbound report
//! shapes consumed from the analysis pipeline, and the [`KnowledgeStore`]
//! abstraction. It is deliberately free of database dependencies; storage
//! backends (e.g. `tasa-store-sqlite`) and the learning layer
//! (`tasa-learning`) depend on it.
//!
//! [`KnowledgeStore`]: store::KnowledgeStore

pub mod comparable;
pub mod error;
pub mod feedback;
pub mod history;
pub mod identity;
pub mod location;
pub mod memory;
pub mod prediction;
pub mod prompt;
pub mod region;
pub mod report;
pub mod resolved;
pub mod snapshot;
pub mod stats;
pub mod store;

pub use error::{Error, Result};
pub use resolved::Resolved;
