//! The analysis workflow engine.
//!
//! Turns a unified diff into a bounded, iteratively refined analysis:
//!
//! ```text
//! diff text ─▸ DiffParser ─▸ FileChange[] ─┐
//!                                           │
//!            RefinementController ◂─────────┘
//!              ├─ per-file stage (bounded fan-out)
//!              ├─ pattern analyzers (always)
//!              ├─ summarize ⇄ evaluate (clarity loop)
//!              └─▸ AnalysisResult | PromptPlan
//!
//! ConsensusAggregator ─▸ N controller runs ─▸ chair merge ─▸ ConsensusReport
//! ```
//!
//! Two callers share one entry point: an executor that owns model
//! credentials runs the pipeline to completion (execute mode), and a
//! host-mediated caller without credentials receives a [`PromptPlan`]
//! describing the work instead (prompt-only mode). The return is
//! mode-tagged so callers must branch explicitly.

pub mod consensus;
pub mod prompts;
pub mod refinement;
pub mod stage;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::diff::DiffParser;
use crate::error::EngineError;
use crate::provider::{build_capability, ModelCapability};

pub use consensus::{ConsensusAggregator, ConsensusReport, SynthesisOutcome};
pub use prompts::PromptBuilder;
pub use refinement::{Phase, RefinementController};
pub use stage::{Stage, StageExecutor, StageRun};
pub use types::{
    AnalysisContext, AnalysisResult, ExecutionMode, FileAnalysis, Finding, FindingCategory,
    ModeFlags, PromptDescriptor, PromptPlan, Provenance, ResourceUsage, RunOutcome, Severity,
    WorkflowState,
};

// ── Entry point ──────────────────────────────────────────────────

/// Caller-supplied options beyond the diff and title.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub description: Option<String>,
    /// Architecture documents or other context to embed in prompts.
    pub external_context: Option<String>,
    pub mode: Option<ExecutionMode>,
}

/// Consensus entry result: aggregated when backends are configured,
/// a plain single-backend result when none are.
#[derive(Debug, Clone)]
pub enum ConsensusOutcome {
    Aggregated(ConsensusReport),
    Single(AnalysisResult),
}

/// The engine facade shared by both execution modes.
pub struct Engine {
    config: EngineConfig,
    capability: Option<Arc<dyn ModelCapability>>,
}

impl Engine {
    pub fn new(config: EngineConfig, capability: Option<Arc<dyn ModelCapability>>) -> Self {
        Self { config, capability }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the immutable context for one run.
    pub fn build_context(
        &self,
        diff_text: &str,
        title: Option<String>,
        flags: ModeFlags,
        opts: &ContextOptions,
        mode: ExecutionMode,
    ) -> AnalysisContext {
        let parser = DiffParser::new(&self.config.diff.exclude);
        let files = parser.parse(diff_text);
        tracing::debug!(files = files.len(), mode = ?mode, "Built analysis context");
        AnalysisContext {
            diff_text: diff_text.to_string(),
            title,
            description: opts.description.clone(),
            files,
            token_budget: self.config.limits.token_budget,
            cost_ceiling_usd: self.config.limits.cost_ceiling_usd,
            flags,
            external_context: opts.external_context.clone(),
            mode,
        }
    }

    /// Run one analysis. Returns the mode-tagged outcome: a completed
    /// result in execute mode, a prompt plan in prompt-only mode.
    pub async fn run(
        &self,
        diff_text: &str,
        title: Option<String>,
        flags: ModeFlags,
        opts: &ContextOptions,
    ) -> Result<RunOutcome, EngineError> {
        let mode = opts.mode.unwrap_or(if self.capability.is_some() {
            ExecutionMode::Execute
        } else {
            ExecutionMode::PromptOnly
        });

        if mode == ExecutionMode::Execute && self.capability.is_none() {
            return Err(EngineError::NoCapability);
        }

        let ctx = self.build_context(diff_text, title, flags, opts, mode);
        let controller = RefinementController::new(ctx, &self.config, self.capability.clone());
        Ok(controller.run().await)
    }

    /// Run the configured consensus backends. With zero backends
    /// configured this is a plain single-backend run — no aggregation
    /// is attempted and the result is returned unmodified.
    pub async fn run_consensus(
        &self,
        diff_text: &str,
        title: Option<String>,
        flags: ModeFlags,
        opts: &ContextOptions,
    ) -> Result<ConsensusOutcome, EngineError> {
        let entries = &self.config.consensus.backends;
        if entries.is_empty() {
            let opts = ContextOptions {
                mode: Some(ExecutionMode::Execute),
                ..opts.clone()
            };
            let outcome = self.run(diff_text, title, flags, &opts).await?;
            let result = outcome
                .as_completed()
                .cloned()
                .expect("execute mode always completes");
            return Ok(ConsensusOutcome::Single(result));
        }

        let timeout = Duration::from_secs(self.config.limits.request_timeout_secs);
        let mut capabilities: Vec<Arc<dyn ModelCapability>> = Vec::new();
        let mut missing_credentials: Vec<String> = Vec::new();

        for entry in entries {
            match entry.resolve_api_key() {
                Some(api_key) => capabilities.push(build_capability(
                    entry.provider,
                    entry.id.clone(),
                    api_key,
                    entry.model_name(),
                    timeout,
                )),
                None => {
                    tracing::warn!(
                        backend = %entry.id,
                        provider = entry.provider.label(),
                        "No API key resolved, counting backend as failed"
                    );
                    missing_credentials.push(entry.id.clone());
                }
            }
        }

        if capabilities.is_empty() {
            return Err(EngineError::AllBackendsFailed {
                attempted: entries.len(),
            });
        }

        let ctx = self.build_context(diff_text, title, flags, opts, ExecutionMode::Execute);
        let aggregator =
            ConsensusAggregator::new(capabilities, self.config.consensus.chair.clone());
        let mut report = aggregator.run(&ctx, &self.config).await?;
        report.failed.extend(missing_credentials);
        Ok(ConsensusOutcome::Aggregated(report))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stage::{
        parse_stage_output, EvaluationOutput, FileAnalysisOutput, RiskOutput, SummaryOutput,
    };
    use crate::error::CapabilityError;
    use crate::provider::ModelResponse;
    use async_trait::async_trait;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,1 +1,4 @@
 fn existing() {}
+fn one() {}
+fn two() {}
+fn three() {}
";

    /// Echoes every stage's schema-default values.
    struct EchoModel;

    fn echo_for_schema(schema_hint: &str) -> String {
        if schema_hint.contains("clarity") {
            r#"{"clarity": 100, "missing": []}"#.into()
        } else if schema_hint.contains("complexity") {
            r#"{"summary": "", "complexity": 1, "findings": []}"#.into()
        } else if schema_hint.contains("reconciled") {
            r#"{"summary": "", "recommendations": [], "findings": []}"#.into()
        } else if schema_hint.contains("recommendations") {
            r#"{"summary": "", "recommendations": []}"#.into()
        } else {
            r#"{"findings": []}"#.into()
        }
    }

    #[async_trait]
    impl ModelCapability for EchoModel {
        fn id(&self) -> &str {
            "echo"
        }

        fn model_name(&self) -> &str {
            "echo-model"
        }

        async fn invoke(
            &self,
            _prompt: &str,
            schema_hint: &str,
        ) -> Result<ModelResponse, CapabilityError> {
            Ok(ModelResponse {
                text: echo_for_schema(schema_hint),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn engine_with_capability() -> Engine {
        Engine::new(EngineConfig::default(), Some(Arc::new(EchoModel)))
    }

    #[tokio::test]
    async fn execute_mode_without_capability_is_an_error() {
        let engine = Engine::new(EngineConfig::default(), None);
        let opts = ContextOptions {
            mode: Some(ExecutionMode::Execute),
            ..Default::default()
        };
        let err = engine
            .run(DIFF, None, ModeFlags::default(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoCapability));
    }

    #[tokio::test]
    async fn missing_capability_defaults_to_prompt_only() {
        let engine = Engine::new(EngineConfig::default(), None);
        let outcome = engine
            .run(DIFF, None, ModeFlags::default(), &ContextOptions::default())
            .await
            .unwrap();
        assert!(outcome.as_planned().is_some());
    }

    #[tokio::test]
    async fn capability_defaults_to_execute() {
        let engine = engine_with_capability();
        let outcome = engine
            .run(DIFF, Some("t".into()), ModeFlags::default(), &ContextOptions::default())
            .await
            .unwrap();
        assert!(outcome.as_completed().is_some());
    }

    #[tokio::test]
    async fn zero_configured_backends_skip_aggregation() {
        let engine = engine_with_capability();
        let outcome = engine
            .run_consensus(DIFF, None, ModeFlags::default(), &ContextOptions::default())
            .await
            .unwrap();
        match outcome {
            ConsensusOutcome::Single(result) => {
                assert!(!result.degraded);
            }
            ConsensusOutcome::Aggregated(_) => panic!("no aggregation should be attempted"),
        }
    }

    #[tokio::test]
    async fn excluded_files_never_reach_the_context() {
        let engine = engine_with_capability();
        let diff = "\
diff --git a/Cargo.lock b/Cargo.lock
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -1,1 +1,2 @@
+version = \"2\"
";
        let ctx = engine.build_context(
            diff,
            None,
            ModeFlags::default(),
            &ContextOptions::default(),
            ExecutionMode::Execute,
        );
        assert!(ctx.files.is_empty());
    }

    /// The spec's round-trip property: executing a prompt plan with a
    /// stub model that echoes each schema's defaults reassembles into
    /// a structurally valid result.
    #[tokio::test]
    async fn prompt_plan_round_trips_through_echo_model() {
        let engine = Engine::new(EngineConfig::default(), None);
        let outcome = engine
            .run(DIFF, Some("round trip".into()), ModeFlags::default(), &ContextOptions::default())
            .await
            .unwrap();
        let plan = outcome.as_planned().unwrap().clone();

        // Replay the plan's prompts through the echo model and fold
        // the parsed outputs into a state, as an external host would.
        let mut state = WorkflowState::default();
        state.findings = plan.heuristic_findings.clone();
        state.complexity = plan.complexity;

        for descriptor in &plan.prompts {
            let echoed = echo_for_schema(&descriptor.expected_schema);
            match descriptor.stage.as_str() {
                "file_analysis" => {
                    let output: FileAnalysisOutput = parse_stage_output(&echoed).unwrap();
                    assert!((1..=5).contains(&output.complexity));
                }
                "risk_detection" => {
                    let output: RiskOutput = parse_stage_output(&echoed).unwrap();
                    state
                        .findings
                        .extend(output.findings.into_iter().map(|raw| raw.into_finding(None)));
                }
                "summary_generation" => {
                    let output: SummaryOutput = parse_stage_output(&echoed).unwrap();
                    state.summary = output.summary;
                    state.recommendations = output.recommendations;
                }
                "self_refinement" => {
                    let output: EvaluationOutput = parse_stage_output(&echoed).unwrap();
                    state.clarity = output.clarity;
                }
                other => panic!("unexpected stage in plan: {other}"),
            }
        }

        let result = AnalysisResult::from_state(plan.title.clone(), &state);
        // Structurally valid: every field present, score in range, no
        // nulls for downstream formatting to trip over.
        assert!((1..=5).contains(&result.complexity));
        assert!(result.findings.is_empty());
        assert!(result.recommendations.is_empty());
        assert_eq!(result.title.as_deref(), Some("round trip"));
    }
}
