//! SQL schema for the tasa SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per knowledge record. Rows are replaced in place on update.
CREATE TABLE IF NOT EXISTS records (
    collection  TEXT NOT NULL,   -- kebab-case Collection name
    record_key  TEXT NOT NULL,
    value_json  TEXT NOT NULL,   -- full serialised record
    updated_at  TEXT NOT NULL,   -- ISO 8601 UTC; server-assigned
    PRIMARY KEY (collection, record_key)
);

CREATE INDEX IF NOT EXISTS records_updated_idx ON records(collection, updated_at);

PRAGMA user_version = 1;
";
