//! The adaptive learning layer of tasa.
//!
//! Each component owns one slice of the knowledge base and accumulates it
//! from finished reports, user feedback and validated predictions:
//!
//! - [`feedback`] persists and summarises user feedback.
//! - [`regional`] aggregates market characteristics per region.
//! - [`comparable`] learns selection criteria per region and property type.
//! - [`prediction`] stores valuations and validates them against outcomes.
//! - [`prompt`] tracks prompt templates, optimisations and A/B tests.
//! - [`location`] learns address structure and area relationships.
//! - [`deepening`] escalates analysis depth for repeatedly analysed properties.
//!
//! [`LearningOrchestrator`] is the single entry point the analysis pipeline
//! talks to. Learning never fails the caller: storage errors are logged and
//! the affected update is skipped.

pub mod comparable;
pub mod config;
pub mod deepening;
pub mod feedback;
pub mod knowledge;
pub mod location;
pub mod orchestrator;
pub mod prediction;
pub mod prompt;
pub mod regional;

pub use config::LearningConfig;
pub use knowledge::Knowledge;
pub use orchestrator::{
  AnalysisUpdate, FeedbackProcessing, LearningOrchestrator, LearningReport, Recommendation,
};
pub use prediction::{FeedbackOutcomes, NoOutcomes, OutcomeSource};

#[cfg(test)]
mod tests;
