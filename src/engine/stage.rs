//! Stage execution.
//!
//! One contract covers both execution strategies: execute mode renders
//! the prompt, invokes the model capability, and parses the response
//! against the stage's expected schema; prompt-only mode renders the
//! same prompt and wraps it into a [`PromptDescriptor`] without ever
//! contacting a model. Parse failures are absorbed: one reparse after
//! stripping code fences, then a schema-conformant default.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use crate::engine::types::{
    ExecutionMode, Finding, FindingCategory, PromptDescriptor, Provenance, ResourceUsage, Severity,
};
use crate::error::CapabilityError;
use crate::provider::{self, ModelCapability};

// ── Stages ───────────────────────────────────────────────────────

/// The model-backed stages of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FileAnalysis,
    RiskDetection,
    Summary,
    Evaluation,
    /// Consensus chair merge; only used by the aggregator.
    Synthesis,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::FileAnalysis => "file_analysis",
            Self::RiskDetection => "risk_detection",
            Self::Summary => "summary_generation",
            Self::Evaluation => "self_refinement",
            Self::Synthesis => "consensus_synthesis",
        }
    }

    /// JSON schema the stage output must conform to.
    pub fn schema(self) -> &'static str {
        match self {
            Self::FileAnalysis => FILE_ANALYSIS_SCHEMA,
            Self::RiskDetection => RISK_SCHEMA,
            Self::Summary => SUMMARY_SCHEMA,
            Self::Evaluation => EVALUATION_SCHEMA,
            Self::Synthesis => SYNTHESIS_SCHEMA,
        }
    }

    /// Instructions handed to an external executor in prompt-only mode.
    pub fn instructions(self) -> &'static str {
        match self {
            Self::FileAnalysis => {
                "Run this prompt against your model once per listed file. \
                 Parse the response as JSON matching the schema; on parse \
                 failure use the schema's default values."
            }
            Self::RiskDetection => {
                "Run this prompt once. Append the parsed findings to the \
                 heuristic findings already included in the plan."
            }
            Self::Summary => {
                "Run this prompt once per refinement iteration, embedding \
                 the latest analyses and findings."
            }
            Self::Evaluation => {
                "Run this prompt after summarizing. If the returned clarity \
                 is below your threshold and you have iterations left, \
                 re-run the summary prompt with the missing-information \
                 notes embedded; otherwise finalize."
            }
            Self::Synthesis => {
                "Run this prompt with every backend's serialized result. \
                 Critical findings must survive the merge unchanged."
            }
        }
    }
}

const FILE_ANALYSIS_SCHEMA: &str = r#"{
  "summary": "one-line summary of what changed in this file",
  "complexity": "integer 1-5",
  "findings": [
    {
      "severity": "critical" | "warning" | "info",
      "category": "security" | "quality" | "breaking",
      "file": "path or null",
      "line": "integer or null",
      "description": "what the issue is"
    }
  ]
}"#;

const RISK_SCHEMA: &str = r#"{
  "findings": [
    {
      "severity": "critical" | "warning" | "info",
      "category": "security" | "quality" | "breaking",
      "file": "path or null",
      "line": "integer or null",
      "description": "what the issue is"
    }
  ]
}"#;

const SUMMARY_SCHEMA: &str = r#"{
  "summary": "concise assessment of the whole change set",
  "recommendations": ["concrete improvement suggestion"]
}"#;

const EVALUATION_SCHEMA: &str = r#"{
  "clarity": "integer 0-100",
  "missing": ["specific piece of missing information"]
}"#;

const SYNTHESIS_SCHEMA: &str = r#"{
  "summary": "reconciled assessment",
  "recommendations": ["merged improvement suggestion"],
  "findings": [
    {
      "severity": "critical" | "warning" | "info",
      "category": "security" | "quality" | "breaking",
      "file": "path or null",
      "line": "integer or null",
      "description": "what the issue is"
    }
  ]
}"#;

// ── Stage outputs ────────────────────────────────────────────────

/// Finding as models emit it: loose strings, mapped into the typed
/// model on conversion. Unknown severities and categories degrade to
/// info/quality instead of failing the parse.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFinding {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub description: String,
}

impl RawFinding {
    pub fn into_finding(self, default_file: Option<&str>) -> Finding {
        Finding {
            severity: match self.severity.as_str() {
                "critical" => Severity::Critical,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            },
            category: match self.category.as_str() {
                "security" => FindingCategory::Security,
                "breaking" => FindingCategory::Breaking,
                _ => FindingCategory::Quality,
            },
            file: self.file.or_else(|| default_file.map(String::from)),
            line: self.line,
            description: self.description,
            provenance: Provenance::Model,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileAnalysisOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    #[serde(default)]
    pub findings: Vec<RawFinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskOutput {
    #[serde(default)]
    pub findings: Vec<RawFinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationOutput {
    #[serde(default = "default_clarity")]
    pub clarity: u8,
    #[serde(default)]
    pub missing: Vec<String>,
}

impl Default for EvaluationOutput {
    // A failed or unparsable evaluation must not keep the loop alive.
    fn default() -> Self {
        Self {
            clarity: 100,
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub findings: Vec<RawFinding>,
}

fn default_complexity() -> u8 {
    1
}

fn default_clarity() -> u8 {
    0
}

// ── Structured-output parsing ────────────────────────────────────

/// Extract JSON content from a response that may be wrapped in
/// markdown code fences.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        if let Some(end) = text[block_start..].find("```") {
            let candidate = text[block_start..block_start + end].trim();
            if let Some(nl) = candidate.find('\n') {
                let first_line = &candidate[..nl];
                if !first_line.starts_with('{') {
                    return candidate[nl + 1..].trim();
                }
            }
            return candidate;
        }
    }
    text.trim()
}

/// Parse a stage response: raw JSON first, then one retry after
/// stripping code fences. `None` means the caller should substitute
/// the stage default.
pub fn parse_stage_output<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(extract_json_block(text)).ok())
}

// ── Stage executor ───────────────────────────────────────────────

/// Result of running one stage: a typed output with its resource
/// usage, or a descriptor for an external executor.
#[derive(Debug, Clone)]
pub enum StageRun<T> {
    Output { value: T, usage: ResourceUsage },
    Descriptor(PromptDescriptor),
}

impl<T> StageRun<T> {
    pub fn into_descriptor(self) -> Option<PromptDescriptor> {
        match self {
            Self::Descriptor(d) => Some(d),
            Self::Output { .. } => None,
        }
    }
}

/// Runs stages under one of the two strategies.
#[derive(Clone)]
pub struct StageExecutor {
    mode: ExecutionMode,
    capability: Option<Arc<dyn ModelCapability>>,
}

impl StageExecutor {
    pub fn new(mode: ExecutionMode, capability: Option<Arc<dyn ModelCapability>>) -> Self {
        Self { mode, capability }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run one stage with already-rendered prompt text.
    ///
    /// Execute mode: invoke, parse, absorb parse failures into the
    /// stage default. Capability failures propagate so the controller
    /// can substitute its own degraded partial result.
    pub async fn run<T>(&self, stage: Stage, prompt: String) -> Result<StageRun<T>, CapabilityError>
    where
        T: DeserializeOwned + Default,
    {
        match self.mode {
            ExecutionMode::PromptOnly => Ok(StageRun::Descriptor(PromptDescriptor {
                stage: stage.name().to_string(),
                prompt,
                expected_schema: stage.schema().to_string(),
                instructions: stage.instructions().to_string(),
            })),
            ExecutionMode::Execute => {
                let capability = self
                    .capability
                    .as_ref()
                    .ok_or(CapabilityError::MissingCredentials {
                        provider: "unconfigured",
                    })?;

                let response = capability.invoke(&prompt, stage.schema()).await?;
                let usage = ResourceUsage {
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    estimated_cost_usd: provider::estimate_cost(
                        capability.model_name(),
                        response.input_tokens,
                        response.output_tokens,
                    ),
                    invocations: 1,
                };

                let value = match parse_stage_output::<T>(&response.text) {
                    Some(value) => value,
                    None => {
                        tracing::warn!(
                            stage = stage.name(),
                            backend = capability.id(),
                            "Unparsable stage output, substituting schema default"
                        );
                        T::default()
                    }
                };

                Ok(StageRun::Output { value, usage })
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
