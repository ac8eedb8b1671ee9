//! Encoding helpers between domain values and SQLite column text.
//!
//! Timestamps are stored as RFC 3339 strings; record bodies as compact JSON.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::Result;

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn encode_value(value: &Value) -> Result<String> { Ok(serde_json::to_string(value)?) }

pub fn decode_value(s: &str) -> Result<Value> { Ok(serde_json::from_str(s)?) }

/// A `records` row before decoding.
pub struct RawRecord {
  pub record_key: String,
  pub value_json: String,
}

impl RawRecord {
  pub fn into_pair(self) -> Result<(String, Value)> {
    let value = decode_value(&self.value_json)?;
    Ok((self.record_key, value))
  }
}
