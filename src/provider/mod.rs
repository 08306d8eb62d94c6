//! Model capability backends.
//!
//! One implementation per provider behind the [`ModelCapability`]
//! trait. Selection happens at construction time through the explicit
//! [`ProviderKind`] enum — never by runtime string lookup. The engine
//! assumes nothing about a provider's response shape beyond "text plus
//! optional token usage".

pub mod anthropic;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CapabilityError;

pub use anthropic::AnthropicCapability;
pub use gemini::GeminiCapability;
pub use openai::OpenAiCapability;

// ── Capability contract ──────────────────────────────────────────

/// Text plus token usage returned from one model invocation.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelResponse {
    /// Fill in missing usage numbers with a 4-chars-per-token estimate.
    pub fn with_estimated_usage(text: String, prompt_len: usize) -> Self {
        let output_estimate = (text.len() / 4) as u64;
        Self {
            text,
            input_tokens: (prompt_len / 4) as u64,
            output_tokens: output_estimate,
        }
    }
}

/// A fallible, possibly slow model invocation target.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Stable identity of this backend (used as the consensus key).
    fn id(&self) -> &str;

    /// Model name sent to the provider.
    fn model_name(&self) -> &str;

    /// Invoke the model with rendered prompt text and a schema hint
    /// describing the expected structured output.
    async fn invoke(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<ModelResponse, CapabilityError>;
}

// ── Provider selection ───────────────────────────────────────────

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn env_key(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Default model when the config names none.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

/// Build a capability for the given provider.
pub fn build_capability(
    kind: ProviderKind,
    id: String,
    api_key: String,
    model: String,
    timeout: Duration,
) -> Arc<dyn ModelCapability> {
    match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicCapability::new(id, api_key, model, timeout)),
        ProviderKind::Gemini => Arc::new(GeminiCapability::new(id, api_key, model, timeout)),
        ProviderKind::OpenAi => Arc::new(OpenAiCapability::new(id, api_key, model, timeout)),
    }
}

// ── Cost estimation ──────────────────────────────────────────────

/// Estimated USD cost of one invocation, per-1M-token rates.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = match model {
        m if m.contains("gpt-4o") => (2.50, 10.00),
        m if m.contains("gpt-4") => (30.00, 60.00),
        m if m.contains("gpt-3.5") => (0.50, 1.50),
        m if m.contains("claude-3-opus") || m.contains("claude-opus") => (15.00, 75.00),
        m if m.contains("claude-sonnet") => (3.00, 15.00),
        m if m.contains("claude-3-haiku") || m.contains("claude-haiku") => (0.25, 1.25),
        m if m.contains("gemini") && m.contains("pro") => (1.25, 5.00),
        m if m.contains("gemini") => (0.30, 2.50),
        _ => (1.00, 3.00),
    };

    let input_cost = (input_tokens as f64 / 1_000_000.0) * input_rate;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * output_rate;
    input_cost + output_cost
}

// ── Tests ────────────────────────────────────────────────────────
