//! Shared data model for the analysis workflow engine.
//!
//! Everything a run produces or consumes lives here: the immutable
//! [`AnalysisContext`] built before a run starts, the controller-owned
//! [`WorkflowState`] accumulator, and the two terminal shapes —
//! [`AnalysisResult`] (execute mode) and [`PromptPlan`] (prompt-only
//! mode). Callers receive them behind the mode-tagged [`RunOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::diff::FileChange;

// ── Severity / category / provenance ─────────────────────────────

/// Severity level for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational note, no action required.
    Info,
    /// Should be addressed but does not block.
    Warning,
    /// Must-fix: correctness, security, or compatibility hazard.
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Secrets, injection, unsafe evaluation.
    Security,
    /// Maintainability and correctness concerns.
    Quality,
    /// Removed or changed public surface.
    Breaking,
}

impl FindingCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Quality => "quality",
            Self::Breaking => "breaking",
        }
    }
}

/// Where a finding came from.
///
/// Heuristic and model findings are appended to the same ordered list
/// and never merged in place; deduplication happens only during
/// consensus synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by a deterministic pattern rule.
    Heuristic,
    /// Produced by a model stage.
    Model,
}

// ── Finding ──────────────────────────────────────────────────────

/// A single detected risk or issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    /// Human-readable description of the issue.
    pub description: String,
    /// File the finding relates to, if known.
    pub file: Option<String>,
    /// Line number within that file, if known.
    pub line: Option<usize>,
    pub provenance: Provenance,
}

// ── Execution mode / stage toggles ───────────────────────────────

/// How the engine executes stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Invoke the configured model capability directly.
    Execute,
    /// Emit prompt descriptors for an external executor; never call a model.
    PromptOnly,
}

/// Which analysis dimensions the caller asked for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeFlags {
    pub summary: bool,
    pub risks: bool,
    pub complexity: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            summary: true,
            risks: true,
            complexity: true,
        }
    }
}

// ── Analysis context ─────────────────────────────────────────────

/// Immutable input for one engine run.
///
/// Built once by the engine facade from the raw diff plus caller
/// options; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    /// Raw unified-diff text.
    pub diff_text: String,
    /// Change-set title (PR title or commit subject).
    pub title: Option<String>,
    /// Free-form description supplied by the caller.
    pub description: Option<String>,
    /// Parsed file changes, diff order preserved, exclusions applied.
    pub files: Vec<FileChange>,
    /// Token ceiling for the whole run.
    pub token_budget: u64,
    /// Cost ceiling in USD for the whole run.
    pub cost_ceiling_usd: f64,
    pub flags: ModeFlags,
    /// Architecture documents or other external context to embed in prompts.
    pub external_context: Option<String>,
    pub mode: ExecutionMode,
}

// ── Per-file analysis ────────────────────────────────────────────

/// Model-produced analysis of one changed file.
///
/// Keyed by path in [`WorkflowState`]; a refinement iteration replaces
/// the entry wholesale rather than accumulating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: String,
    pub summary: String,
    /// This file's contribution to overall complexity, 1-5.
    pub complexity: u8,
    pub findings: Vec<Finding>,
    /// Set when the per-file stage failed and a default was substituted.
    pub degraded: bool,
}

impl FileAnalysis {
    /// Schema-conformant default used when the per-file stage fails.
    pub fn degraded_for(path: &str) -> Self {
        Self {
            path: path.to_string(),
            summary: String::new(),
            complexity: 1,
            findings: Vec::new(),
            degraded: true,
        }
    }
}

// ── Resource usage ───────────────────────────────────────────────

/// Token and cost counters for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    /// Number of model invocations attempted.
    pub invocations: u32,
}

impl ResourceUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn absorb(&mut self, other: ResourceUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated_cost_usd += other.estimated_cost_usd;
        self.invocations += other.invocations;
    }
}

// ── Workflow state ───────────────────────────────────────────────

/// The refinement controller's mutable accumulator.
///
/// Owned exclusively by one controller for the lifetime of one run.
/// Concurrent per-file stages report back through join results; all
/// writes happen on the controller task.
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    /// Completed refinement iterations. Never exceeds the configured max.
    pub iteration: u32,
    /// Findings from every source, appended in discovery order.
    pub findings: Vec<Finding>,
    /// Per-file analyses keyed by path.
    pub file_analyses: BTreeMap<String, FileAnalysis>,
    /// Running summary, refreshed each summarize pass.
    pub summary: String,
    pub recommendations: Vec<String>,
    /// Self-assessed completeness, 0-100. Not assumed monotonic.
    pub clarity: u8,
    /// Gaps the evaluation stage flagged as missing information.
    pub missing_info: Vec<String>,
    /// Overall complexity score, 1-5.
    pub complexity: u8,
    pub usage: ResourceUsage,
    /// Set when a whole stage (not just one unit) had to be skipped.
    pub degraded: bool,
}

// ── Analysis result ──────────────────────────────────────────────

/// Terminal snapshot of a run, exposed to the caller. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Unique id for this run.
    pub run_id: String,
    pub title: Option<String>,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub file_analyses: Vec<FileAnalysis>,
    /// Overall complexity, 1-5.
    pub complexity: u8,
    pub recommendations: Vec<String>,
    /// Final clarity score from the last evaluation pass, 0-100.
    pub clarity: u8,
    /// Refinement iterations actually executed.
    pub iterations: u32,
    pub usage: ResourceUsage,
    /// True when one or more stages fell back to degraded defaults.
    pub degraded: bool,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Snapshot the workflow state into an immutable result.
    pub fn from_state(title: Option<String>, state: &WorkflowState) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            title,
            summary: state.summary.clone(),
            findings: state.findings.clone(),
            file_analyses: state.file_analyses.values().cloned().collect(),
            complexity: state.complexity.clamp(1, 5),
            recommendations: state.recommendations.clone(),
            clarity: state.clarity,
            iterations: state.iteration,
            usage: state.usage,
            degraded: state.degraded,
            completed_at: Utc::now(),
        }
    }

    /// Findings at a given severity.
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Whether any finding is critical.
    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Critical)
    }
}

// ── Prompt plan ──────────────────────────────────────────────────

/// One unit of externally executable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    /// Stage name, e.g. "file_analysis".
    pub stage: String,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// JSON schema the stage output must conform to.
    pub expected_schema: String,
    /// Instructions for the external executor.
    pub instructions: String,
}

/// Ordered work description returned instead of an [`AnalysisResult`]
/// when the engine has no model credentials. No mutation after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPlan {
    pub run_id: String,
    pub title: Option<String>,
    /// Descriptors in execution order.
    pub prompts: Vec<PromptDescriptor>,
    /// Findings the deterministic analyzers already produced.
    pub heuristic_findings: Vec<Finding>,
    /// Deterministic complexity score, 1-5.
    pub complexity: u8,
    /// Paths of the files covered by per-file descriptors.
    pub files: Vec<String>,
}

// ── Run outcome ──────────────────────────────────────────────────

/// Mode-tagged return of the engine entry point.
///
/// Callers must branch explicitly; receiving the wrong arm for the
/// configured mode is a programming error, not a runtime condition.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Execute mode: the engine ran the pipeline to completion.
    Completed(AnalysisResult),
    /// Prompt-only mode: the engine described the work instead.
    Planned(PromptPlan),
}

impl RunOutcome {
    pub fn as_completed(&self) -> Option<&AnalysisResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Planned(_) => None,
        }
    }

    pub fn as_planned(&self) -> Option<&PromptPlan> {
        match self {
            Self::Planned(plan) => Some(plan),
            Self::Completed(_) => None,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
