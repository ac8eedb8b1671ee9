//! [`JsonOutcomes`] — actual sale outcomes loaded from a JSON file.
//!
//! The file holds an array of [`ActualOutcome`] objects, e.g. an export from
//! a land-registry feed. When a property has several, the most recently
//! observed wins.

use std::{collections::HashMap, convert::Infallible, path::Path};

use tasa_core::prediction::{ActualOutcome, Prediction};
use tasa_learning::OutcomeSource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutcomeFileError {
  #[error("failed to read outcome file: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed outcome file: {0}")]
  Json(#[from] serde_json::Error),
}

pub struct JsonOutcomes {
  by_property: HashMap<String, ActualOutcome>,
}

impl JsonOutcomes {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, OutcomeFileError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json(&raw)
  }

  pub fn from_json(json: &str) -> Result<Self, OutcomeFileError> {
    let outcomes: Vec<ActualOutcome> = serde_json::from_str(json)?;
    let mut by_property: HashMap<String, ActualOutcome> = HashMap::new();
    for outcome in outcomes.into_iter().filter(|o| o.actual_price > 0.0) {
      match by_property.get(&outcome.property_id) {
        Some(existing) if existing.observed_at >= outcome.observed_at => {}
        _ => {
          by_property.insert(outcome.property_id.clone(), outcome);
        }
      }
    }
    Ok(Self { by_property })
  }

  pub fn len(&self) -> usize { self.by_property.len() }
}

impl OutcomeSource for JsonOutcomes {
  type Error = Infallible;

  async fn actual_outcome(
    &self,
    prediction: &Prediction,
  ) -> Result<Option<ActualOutcome>, Infallible> {
    Ok(self.by_property.get(&prediction.property_id).cloned())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use pretty_assertions::assert_eq;

  use super::*;

  const OUTCOMES: &str = r#"[
    {"property_id": "p1", "actual_price": 300000, "observed_at": "2026-01-01T00:00:00Z", "source": "registry"},
    {"property_id": "p1", "actual_price": 310000, "observed_at": "2026-03-01T00:00:00Z", "source": "registry"},
    {"property_id": "p2", "actual_price": 0, "observed_at": "2026-03-01T00:00:00Z", "source": "registry"}
  ]"#;

  #[test]
  fn latest_outcome_per_property_wins() {
    let o = JsonOutcomes::from_json(OUTCOMES).unwrap();
    assert_eq!(o.len(), 1);
    assert_eq!(o.by_property["p1"].actual_price, 310_000.0);
  }

  #[test]
  fn loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(OUTCOMES.as_bytes()).unwrap();
    let o = JsonOutcomes::load(file.path()).unwrap();
    assert_eq!(o.len(), 1);
  }

  #[test]
  fn malformed_file_is_an_error() {
    assert!(matches!(JsonOutcomes::from_json("{"), Err(OutcomeFileError::Json(_))));
  }
}
