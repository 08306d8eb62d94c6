//! Markdown rendering of analysis output.
//!
//! Shapes results for PR comments and terminal display. Degraded
//! results render the same structure with empty sections — callers
//! never need null checks beyond the degraded marker itself.

use crate::engine::consensus::{ConsensusReport, SynthesisOutcome};
use crate::engine::types::{AnalysisResult, Finding, PromptPlan, Severity};

/// Render one analysis result as markdown.
pub fn result_to_markdown(result: &AnalysisResult) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "## Change Analysis `{}`\n\n",
        result.title.as_deref().unwrap_or("(untitled)")
    ));
    if result.degraded {
        md.push_str("> Degraded result: one or more stages fell back to defaults.\n\n");
    }
    md.push_str(&format!(
        "**Complexity**: {}/5 | **Clarity**: {}/100 | **Iterations**: {}\n\n",
        result.complexity, result.clarity, result.iterations,
    ));

    if result.summary.is_empty() {
        md.push_str("_No summary available._\n\n");
    } else {
        md.push_str(&format!("{}\n\n", result.summary));
    }

    md.push_str(&findings_table(&result.findings));

    if !result.recommendations.is_empty() {
        md.push_str("### Recommendations\n\n");
        for rec in &result.recommendations {
            md.push_str(&format!("- {rec}\n"));
        }
        md.push('\n');
    }

    md.push_str(&format!(
        "*{} invocation(s), {} tokens, est. ${:.4}*\n",
        result.usage.invocations,
        result.usage.total_tokens(),
        result.usage.estimated_cost_usd,
    ));

    md
}

/// Render a consensus report: synthesis first, per-backend after.
pub fn consensus_to_markdown(report: &ConsensusReport) -> String {
    let mut md = String::new();

    md.push_str("## Multi-Model Consensus\n\n");
    match &report.synthesis {
        SynthesisOutcome::Chair { backend } => {
            md.push_str(&format!("Synthesized by chair `{backend}`.\n\n"));
        }
        SynthesisOutcome::SoleSurvivor { backend } => {
            md.push_str(&format!(
                "Only `{backend}` completed; its result is shown unmodified.\n\n"
            ));
        }
        SynthesisOutcome::ChairFallback { chair, fallback_to } => {
            md.push_str(&format!(
                "Chair `{chair}` synthesis failed; showing `{fallback_to}`'s raw result.\n\n"
            ));
        }
    }
    if !report.failed.is_empty() {
        md.push_str(&format!("Failed backends: {}\n\n", report.failed.join(", ")));
    }

    md.push_str(&result_to_markdown(&report.synthesized));

    for (backend, result) in &report.results {
        md.push_str(&format!("\n---\n\n### Backend `{backend}`\n\n"));
        md.push_str(&result_to_markdown(result));
    }

    md
}

/// Render a prompt plan for a host that executes it externally.
pub fn plan_to_markdown(plan: &PromptPlan) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "## Prompt Plan `{}`\n\n",
        plan.title.as_deref().unwrap_or("(untitled)")
    ));
    md.push_str(&format!(
        "Deterministic complexity: {}/5 | Files: {}\n\n",
        plan.complexity,
        plan.files.len(),
    ));
    md.push_str(&findings_table(&plan.heuristic_findings));

    for (index, descriptor) in plan.prompts.iter().enumerate() {
        md.push_str(&format!(
            "### Step {} — `{}`\n\n{}\n\n```\n{}\n```\n\nExpected schema:\n\n```json\n{}\n```\n\n",
            index + 1,
            descriptor.stage,
            descriptor.instructions,
            descriptor.prompt,
            descriptor.expected_schema,
        ));
    }

    md
}

fn findings_table(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No findings.\n\n".into();
    }

    let mut md = String::new();
    md.push_str("| Severity | Category | Source | Description |\n");
    md.push_str("|----------|----------|--------|-------------|\n");
    for finding in findings {
        let location = match (&finding.file, finding.line) {
            (Some(file), Some(line)) => format!(" (`{file}:{line}`)"),
            (Some(file), None) => format!(" (`{file}`)"),
            _ => String::new(),
        };
        md.push_str(&format!(
            "| {} | {} | {:?} | {}{} |\n",
            finding.severity.label(),
            finding.category.label(),
            finding.provenance,
            finding.description,
            location,
        ));
    }

    let critical = findings.iter().filter(|f| f.severity == Severity::Critical).count();
    let warning = findings.iter().filter(|f| f.severity == Severity::Warning).count();
    let info = findings.iter().filter(|f| f.severity == Severity::Info).count();
    md.push_str(&format!(
        "\nCritical: {critical} | Warning: {warning} | Info: {info}\n\n"
    ));

    md
}

// ── Tests ────────────────────────────────────────────────────────
