//! `tasa` — operate the regional-learning knowledge base from the shell.
//!
//! # Usage
//!
//! ```
//! tasa ingest report.json --quality 80
//! tasa feedback feedback.json --report report.json
//! tasa validate --outcomes sales.json
//! tasa criteria malaga villa
//! tasa report
//! ```
//!
//! Every command prints pretty JSON on stdout; logs go to stderr and are
//! filtered with `RUST_LOG`.

mod outcomes;
mod settings;

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Serialize, de::DeserializeOwned};
use strum::IntoEnumIterator as _;
use tasa_core::{
  feedback::Feedback,
  prompt::{Arm, PromptCategory},
  report::{Property, PropertyType, Report, Season},
  snapshot::{export_collection, import_collection},
  store::Collection,
};
use tasa_learning::LearningOrchestrator;
use tasa_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{outcomes::JsonOutcomes, settings::Settings};

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tasa", version, about = "Regional learning for property reports")]
struct Cli {
  /// Path to the TOML settings file.
  #[arg(short, long, default_value = "tasa.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Learn from a finished report (JSON).
  Ingest {
    report:  PathBuf,
    /// Analysis quality 0–100; derived from the report when omitted.
    #[arg(long)]
    quality: Option<f64>,
  },
  /// Submit user feedback (JSON), optionally with the report it rates.
  Feedback {
    feedback: PathBuf,
    #[arg(long)]
    report:   Option<PathBuf>,
  },
  /// Validate predictions older than the minimum age.
  Validate {
    /// JSON array of actual outcomes; defaults to outcomes in user feedback.
    #[arg(long)]
    outcomes: Option<PathBuf>,
  },
  /// Comparable selection criteria for a region and property type.
  Criteria {
    region:        String,
    property_type: PropertyType,
  },
  /// Criteria adapted to one property (JSON).
  Enhanced { property: PathBuf },
  /// Best known template for a prompt category.
  Prompt { category: PromptCategory },
  /// Learned characteristics of a region.
  Insights { region: String },
  /// Forecast for a property (JSON) from regional knowledge.
  Predict {
    property: PathBuf,
    #[arg(long)]
    season:   Option<Season>,
  },
  /// Depth and focus for the next analysis of a property (JSON).
  Strategy { property: PathBuf },
  /// Rewrite every underperforming prompt template.
  Optimize,
  /// Prompt A/B tests.
  Ab {
    #[command(subcommand)]
    command: AbCommand,
  },
  /// Emerging trends, anomalies, opportunities and risks across regions.
  Patterns,
  /// Remove stale ungraduated location knowledge.
  Decay,
  /// Full learning report with recommendations.
  Report,
  /// Recommendations only.
  Recommendations,
  /// Write every collection as `<dir>/<collection>.json`.
  Export {
    dir:        PathBuf,
    /// Only this collection.
    #[arg(long)]
    collection: Option<Collection>,
  },
  /// Load the snapshot files found in a directory written by `export`.
  Import {
    dir:        PathBuf,
    #[arg(long)]
    collection: Option<Collection>,
  },
}

#[derive(Subcommand)]
enum AbCommand {
  /// Start a test between two templates read from files.
  Start {
    category:   PromptCategory,
    template_a: PathBuf,
    template_b: PathBuf,
    #[arg(long, default_value_t = 14)]
    days:       u32,
  },
  /// Record one use of an arm.
  Record {
    test_id: Uuid,
    arm:     Arm,
    #[arg(long)]
    failed:  bool,
    #[arg(long)]
    rating:  Option<f64>,
  },
  /// Compute the current result.
  Evaluate { test_id: Uuid },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  if let Some(parent) = settings.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;
  tracing::debug!(path = ?settings.store_path, "knowledge store opened");

  let orchestrator = LearningOrchestrator::new(Arc::new(store), settings.learning);
  run(&orchestrator, cli.command).await
}

async fn run(o: &LearningOrchestrator<SqliteStore>, command: Command) -> anyhow::Result<()> {
  let now = Utc::now();
  match command {
    Command::Ingest { report, quality } => {
      let report: Report = read_json(&report)?;
      print_json(&o.update_regional_knowledge(&report, quality, now).await)
    }
    Command::Feedback { feedback, report } => {
      let feedback: Feedback = read_json(&feedback)?;
      let report: Option<Report> = report.as_deref().map(read_json::<Report>).transpose()?;
      print_json(&o.process_user_feedback(&feedback, report.as_ref(), now).await)
    }
    Command::Validate { outcomes: Some(path) } => {
      let source = JsonOutcomes::load(&path)
        .with_context(|| format!("failed to load outcomes from {path:?}"))?;
      tracing::info!(properties = source.len(), "outcomes loaded");
      print_json(&o.validate_predictions(&source, now).await)
    }
    Command::Validate { outcomes: None } => {
      print_json(&o.validate_predictions(&o.feedback_outcomes(), now).await)
    }
    Command::Criteria { region, property_type } => {
      print_json(&o.optimal_comparable_criteria(&region, property_type).await)
    }
    Command::Enhanced { property } => {
      let property: Property = read_json(&property)?;
      print_json(&o.enhanced_criteria(&property).await)
    }
    Command::Prompt { category } => print_json(&o.best_prompt_template(category).await),
    Command::Insights { region } => print_json(&o.regional_insights(&region).await),
    Command::Predict { property, season } => {
      let property: Property = read_json(&property)?;
      print_json(&o.predict_property_performance(&property, season).await)
    }
    Command::Strategy { property } => {
      let property: Property = read_json(&property)?;
      print_json(&o.deepening_strategy(&property, now).await)
    }
    Command::Optimize => print_json(&o.prompts().optimize_prompts(now).await),
    Command::Ab { command } => run_ab(o, command).await,
    Command::Patterns => print_json(&o.detect_market_patterns().await),
    Command::Decay => print_json(&o.decay_locations(now).await),
    Command::Report => print_json(&o.generate_learning_report(now).await),
    Command::Recommendations => print_json(&o.system_recommendations().await),
    Command::Export { dir, collection } => {
      std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir:?}"))?;
      for collection in selected(collection) {
        let json = export_collection(o.store().as_ref(), collection)
          .await
          .with_context(|| format!("failed to export {collection}"))?;
        let path = snapshot_path(&dir, collection);
        std::fs::write(&path, json).with_context(|| format!("failed to write {path:?}"))?;
      }
      tracing::info!(?dir, "snapshot exported");
      Ok(())
    }
    Command::Import { dir, collection } => {
      let mut imported = BTreeMap::new();
      for collection in selected(collection) {
        let path = snapshot_path(&dir, collection);
        if !path.exists() {
          tracing::debug!(?path, "no snapshot file; skipped");
          continue;
        }
        let json = read_text(&path)?;
        let count = import_collection(o.store().as_ref(), collection, &json)
          .await
          .with_context(|| format!("failed to import {collection}"))?;
        imported.insert(collection.to_string(), count);
      }
      print_json(&imported)
    }
  }
}

async fn run_ab(o: &LearningOrchestrator<SqliteStore>, command: AbCommand) -> anyhow::Result<()> {
  let now = Utc::now();
  let prompts = o.prompts();
  match command {
    AbCommand::Start { category, template_a, template_b, days } => {
      let a = read_text(&template_a)?;
      let b = read_text(&template_b)?;
      print_json(&prompts.start_ab_test(category, &a, &b, days, now).await)
    }
    AbCommand::Record { test_id, arm, failed, rating } => {
      let test = prompts
        .record_ab_usage(test_id, arm, !failed, rating, now)
        .await
        .with_context(|| format!("no A/B test {test_id}"))?;
      print_json(&test)
    }
    AbCommand::Evaluate { test_id } => {
      let result = prompts
        .evaluate_ab_test(test_id, now)
        .await
        .with_context(|| format!("no A/B test {test_id}"))?;
      print_json(&result)
    }
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn selected(only: Option<Collection>) -> Vec<Collection> {
  match only {
    Some(c) => vec![c],
    None => Collection::iter().collect(),
  }
}

fn snapshot_path(dir: &Path, collection: Collection) -> PathBuf {
  dir.join(format!("{collection}.json"))
}

fn read_text(path: &Path) -> anyhow::Result<String> {
  std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let raw = read_text(path)?;
  serde_json::from_str(&raw).with_context(|| format!("failed to parse {path:?}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
