//! diffsense — multi-model diff analysis engine.
//!
//! Takes a unified diff and produces a structured assessment: summary,
//! per-file findings, risk flags, a 1-5 complexity score, and
//! improvement recommendations. Runs in two modes behind one entry
//! point: execute mode drives the configured model backends itself;
//! prompt-only mode emits a [`engine::PromptPlan`] for a host that
//! owns its own model. The [`engine::ConsensusAggregator`] layers
//! multi-backend agreement on top.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod integrations;
pub mod provider;
pub mod report;

pub use config::EngineConfig;
pub use engine::{
    AnalysisResult, ConsensusOutcome, ContextOptions, Engine, ExecutionMode, ModeFlags,
    PromptPlan, RunOutcome,
};
pub use error::{CapabilityError, EngineError};
