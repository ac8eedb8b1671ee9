//! Settings for the `tasa` binary.
//!
//! Read from an optional TOML file, then overridden by `TASA_*` environment
//! variables (`TASA_STORE_PATH`, `TASA_LEARNING__PREDICTION_MIN_AGE_DAYS`).

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tasa_learning::LearningConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// SQLite file holding the knowledge base. A leading `~/` is expanded.
  pub store_path: PathBuf,
  pub learning:   LearningConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("~/.local/share/tasa/knowledge.db"),
      learning:   LearningConfig::default(),
    }
  }
}

impl Settings {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TASA").separator("__"))
      .build()
      .context("failed to read settings")?;
    let mut settings: Settings = raw
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
