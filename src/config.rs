//! Engine configuration.
//!
//! Loaded once per run from TOML (or built in code) and never mutated
//! by the engine. Every field has a default so an empty config file is
//! valid. API keys may live in the config or fall back to the
//! provider's conventional environment variable.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::provider::ProviderKind;

/// Top-level configuration, read once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub refinement: RefinementConfig,
    pub limits: LimitsConfig,
    pub stages: StageConfig,
    pub diff: DiffConfig,
    pub consensus: ConsensusConfig,
}

impl EngineConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

// ── Refinement loop ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Hard cap on refinement iterations, regardless of clarity trend.
    pub max_iterations: u32,
    /// Loop back to summarize while clarity is below this, 0-100.
    pub clarity_threshold: u8,
    /// Fast path: skip evaluate/refine at or below this file count...
    pub fast_path_max_files: usize,
    /// ...and at or below this raw diff size in bytes.
    pub fast_path_max_diff_bytes: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            clarity_threshold: 75,
            fast_path_max_files: 3,
            fast_path_max_diff_bytes: 2_000,
        }
    }
}

// ── Budgets and limits ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent per-file analyses (and per-backend consensus runs).
    pub parallelism: usize,
    /// Token ceiling for a whole run.
    pub token_budget: u64,
    /// USD ceiling for a whole run.
    pub cost_ceiling_usd: f64,
    /// Character budget applied to long fields before prompt substitution.
    pub prompt_char_budget: usize,
    /// Per-invocation timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            token_budget: 200_000,
            cost_ceiling_usd: 5.0,
            prompt_char_budget: 24_000,
            request_timeout_secs: 120,
        }
    }
}

// ── Stage toggles ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub summary: bool,
    pub risks: bool,
    pub complexity: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            summary: true,
            risks: true,
            complexity: true,
        }
    }
}

// ── Diff handling ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Glob patterns dropped before analysis.
    pub exclude: Vec<String>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                "**/target/**".into(),
                "**/node_modules/**".into(),
                "**/vendor/**".into(),
                "**/dist/**".into(),
                "**/build/**".into(),
                "**/*.lock".into(),
                "*.lock".into(),
                "**/package-lock.json".into(),
                "**/*.min.js".into(),
            ],
        }
    }
}

// ── Consensus backends ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Independent model backends; empty means single-backend runs only.
    pub backends: Vec<BackendEntry>,
    /// Backend id designated to synthesize the merged report.
    /// Defaults to the first configured backend.
    pub chair: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Stable identity used as the consensus key.
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    /// Inline API key; when absent the provider's env var is consulted.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl BackendEntry {
    /// Config key first, provider env var second.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(self.provider.env_key())
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────
