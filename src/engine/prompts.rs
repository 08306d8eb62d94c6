//! Stage prompt templates.
//!
//! One builder method per stage. Long fields (diff hunks, descriptions,
//! external context) are truncated to the configured character budget
//! BEFORE substitution, so the rendered prompt size is exact rather
//! than approximate. Both execution strategies render through these
//! methods, which is what makes execute-mode and prompt-only output
//! byte-identical for the same inputs.

use crate::diff::FileChange;
use crate::engine::types::{AnalysisContext, AnalysisResult, Finding, WorkflowState};

/// Renders stage-specific prompt text from context + state snapshots.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    char_budget: usize,
}

impl PromptBuilder {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    /// Per-file analysis prompt.
    pub fn file_analysis(&self, ctx: &AnalysisContext, file: &FileChange) -> String {
        format!(
            r#"You are reviewing one file from a code change set.

## Change Set
Title: {title}

## File
Path: {path}
Status: {status}
Language: {language}
Lines: +{added} / -{removed}

## Hunks
```diff
{hunks}
```

## Instructions
Summarize what changed in this file, rate its complexity contribution
from 1 (trivial) to 5 (very complex), and list any issues you see."#,
            title = self.clip(ctx.title.as_deref().unwrap_or("(untitled)")),
            path = file.path,
            status = file.status.label(),
            language = file.language,
            added = file.added,
            removed = file.removed,
            hunks = self.clip(&file.hunk_text),
        )
    }

    /// Model-layer risk detection prompt. Heuristic findings are shown
    /// so the model extends rather than repeats them.
    pub fn risk_detection(&self, ctx: &AnalysisContext, heuristic: &[Finding]) -> String {
        format!(
            r#"You are auditing a code change set for risks.

## Change Set
Title: {title}
Files changed: {file_count}

## Diff
```diff
{diff}
```

## Findings Already Detected by Pattern Rules
{heuristic}

## Instructions
Report additional security, quality, or compatibility risks not already
listed above. Do not repeat the pattern-rule findings."#,
            title = self.clip(ctx.title.as_deref().unwrap_or("(untitled)")),
            file_count = ctx.files.len(),
            diff = self.clip(&ctx.diff_text),
            heuristic = render_findings(heuristic),
        )
    }

    /// Summary / recommendation prompt. On refinement iterations the
    /// previous summary and the evaluation's gap notes are embedded.
    pub fn summary(&self, ctx: &AnalysisContext, state: &WorkflowState) -> String {
        let refinement_notes = if state.iteration == 0 {
            String::new()
        } else {
            format!(
                "\n## Previous Summary (iteration {iter})\n{prev}\n\n## Missing Information To Address\n{gaps}\n",
                iter = state.iteration,
                prev = self.clip(&state.summary),
                gaps = render_list(&state.missing_info),
            )
        };

        format!(
            r#"You are writing the overall assessment of a code change set.

## Change Set
Title: {title}
Description: {description}

## Files
{files}

## Per-File Analyses
{analyses}

## Findings
{findings}

## External Context
{external}
{refinement}
## Instructions
Produce a concise summary of the change set and a list of concrete
improvement recommendations."#,
            title = self.clip(ctx.title.as_deref().unwrap_or("(untitled)")),
            description = self.clip(ctx.description.as_deref().unwrap_or("(none)")),
            files = render_file_list(ctx),
            analyses = render_analyses(state),
            findings = render_findings(&state.findings),
            external = self.clip(ctx.external_context.as_deref().unwrap_or("(none)")),
            refinement = refinement_notes,
        )
    }

    /// Clarity evaluation prompt for the self-refinement loop.
    pub fn evaluation(&self, ctx: &AnalysisContext, state: &WorkflowState) -> String {
        format!(
            r#"You are judging the completeness of a code change analysis.

## Change Set
Title: {title}
Files changed: {file_count}

## Current Summary
{summary}

## Current Recommendations
{recommendations}

## Finding Count
{finding_count}

## Instructions
Score the analysis for clarity and completeness from 0 (useless) to 100
(nothing meaningful left to add), and list the specific pieces of
missing information that keep it below 100."#,
            title = self.clip(ctx.title.as_deref().unwrap_or("(untitled)")),
            file_count = ctx.files.len(),
            summary = self.clip(&state.summary),
            recommendations = render_list(&state.recommendations),
            finding_count = state.findings.len(),
        )
    }

    /// Chair prompt for consensus synthesis.
    pub fn synthesis(&self, results: &[(String, AnalysisResult)]) -> String {
        let mut serialized = String::new();
        for (backend, result) in results {
            serialized.push_str(&format!("### Backend `{backend}`\n"));
            let json = serde_json::to_string_pretty(result)
                .unwrap_or_else(|_| "(unserializable)".into());
            serialized.push_str(&self.clip(&json));
            serialized.push_str("\n\n");
        }

        format!(
            r#"You are the chair of a panel of independent code reviewers. Each
backend below analyzed the same change set.

## Independent Analyses
{serialized}
## Instructions
Reconcile these into one report. Rules:
1. Every finding any backend marked critical MUST appear in your output
   with its severity unchanged. Never downgrade severity by majority.
2. Where backends disagree on wording, prefer the most specific
   description.
Produce the merged summary, findings, and recommendations."#,
        )
    }

    /// Truncate to the character budget, on a char boundary. Applied to
    /// every long field before substitution.
    fn clip(&self, text: &str) -> String {
        truncate_chars(text, self.char_budget)
    }
}

/// Cut `text` to at most `budget` characters.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

fn render_file_list(ctx: &AnalysisContext) -> String {
    if ctx.files.is_empty() {
        return "(none)".into();
    }
    ctx.files
        .iter()
        .map(|f| format!("- {} ({}, +{}/-{})", f.path, f.status.label(), f.added, f.removed))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_analyses(state: &WorkflowState) -> String {
    if state.file_analyses.is_empty() {
        return "(none)".into();
    }
    state
        .file_analyses
        .values()
        .map(|a| {
            let summary = if a.summary.is_empty() {
                "(unavailable)"
            } else {
                a.summary.as_str()
            };
            format!("- {} [complexity {}]: {}", a.path, a.complexity, summary)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "(none)".into();
    }
    findings
        .iter()
        .map(|f| {
            let location = match (&f.file, f.line) {
                (Some(file), Some(line)) => format!(" ({file}:{line})"),
                (Some(file), None) => format!(" ({file})"),
                _ => String::new(),
            };
            format!(
                "- [{}] {}: {}{}",
                f.severity.label(),
                f.category.label(),
                f.description,
                location,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".into();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ────────────────────────────────────────────────────────
