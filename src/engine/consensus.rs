//! Multi-model consensus.
//!
//! Fans one analysis context out to N independently configured model
//! backends, one refinement run per backend, then reconciles the
//! surviving results. Synthesis is delegated to a designated "chair"
//! backend under two hard rules: critical findings from any backend
//! always survive with severity unchanged, and numeric scores are
//! averaged, not voted. Every fallback is deterministic — the
//! aggregator never throws the consensus step away while at least one
//! backend produced a result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::engine::prompts::PromptBuilder;
use crate::engine::refinement::RefinementController;
use crate::engine::stage::{parse_stage_output, Stage, SynthesisOutput};
use crate::engine::types::{
    AnalysisContext, AnalysisResult, ExecutionMode, Finding, ResourceUsage, RunOutcome, Severity,
};
use crate::error::EngineError;
use crate::provider::{self, ModelCapability};

// ── Report ───────────────────────────────────────────────────────

/// How the synthesized result was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SynthesisOutcome {
    /// The chair backend produced a parseable merged report.
    Chair { backend: String },
    /// Only one backend survived; its result is passed through
    /// unmodified.
    SoleSurvivor { backend: String },
    /// The chair's output was unusable; the first successful backend's
    /// raw result is passed through, annotated.
    ChairFallback { chair: String, fallback_to: String },
}

/// One result per surviving backend plus the synthesized merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// Successful backend results, keyed by backend id.
    pub results: BTreeMap<String, AnalysisResult>,
    /// Backends whose runs failed (capability unreachable, degraded).
    pub failed: Vec<String>,
    pub synthesized: AnalysisResult,
    pub synthesis: SynthesisOutcome,
}

// ── Aggregator ───────────────────────────────────────────────────

/// Runs one refinement controller per backend and merges the results.
pub struct ConsensusAggregator {
    backends: Vec<Arc<dyn ModelCapability>>,
    chair: Option<String>,
}

impl ConsensusAggregator {
    pub fn new(backends: Vec<Arc<dyn ModelCapability>>, chair: Option<String>) -> Self {
        Self { backends, chair }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Run every backend concurrently (bounded fan-out, join-all
    /// fan-in) and synthesize a consensus report.
    pub async fn run(
        &self,
        ctx: &AnalysisContext,
        config: &EngineConfig,
    ) -> Result<ConsensusReport, EngineError> {
        let attempted = self.backends.len();
        if attempted == 0 {
            return Err(EngineError::AllBackendsFailed { attempted: 0 });
        }

        let mut pending: std::collections::VecDeque<_> = self.backends.iter().cloned().collect();
        let parallelism = config.limits.parallelism.max(1);
        let mut set = JoinSet::new();

        let mut successes: Vec<(String, AnalysisResult)> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        loop {
            while set.len() < parallelism {
                let Some(capability) = pending.pop_front() else {
                    break;
                };
                let mut backend_ctx = ctx.clone();
                backend_ctx.mode = ExecutionMode::Execute;
                let config = config.clone();
                set.spawn(async move {
                    let id = capability.id().to_string();
                    tracing::info!(backend = %id, "Launching consensus backend run");
                    let outcome = RefinementController::new(backend_ctx, &config, Some(capability))
                        .run()
                        .await;
                    (id, outcome)
                });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };

            match joined {
                Ok((id, RunOutcome::Completed(result))) => {
                    if result.degraded {
                        tracing::warn!(backend = %id, "Backend run degraded, excluding from consensus");
                        failed.push(id);
                    } else {
                        successes.push((id, result));
                    }
                }
                Ok((id, RunOutcome::Planned(_))) => {
                    // Consensus backends always run in execute mode.
                    tracing::warn!(backend = %id, "Backend unexpectedly returned a plan");
                    failed.push(id);
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "Backend task aborted");
                    failed.push("(aborted)".to_string());
                }
            }
        }

        // Keep config declaration order for deterministic fallbacks.
        successes.sort_by_key(|(id, _)| {
            self.backends
                .iter()
                .position(|b| b.id() == id)
                .unwrap_or(usize::MAX)
        });

        if successes.is_empty() {
            return Err(EngineError::AllBackendsFailed { attempted });
        }

        if let [(id, result)] = &successes[..] {
            let (id, result) = (id.clone(), result.clone());
            tracing::info!(backend = %id, "Single surviving backend, skipping synthesis");
            let mut results = BTreeMap::new();
            results.insert(id.clone(), result.clone());
            return Ok(ConsensusReport {
                results,
                failed,
                synthesized: result,
                synthesis: SynthesisOutcome::SoleSurvivor { backend: id },
            });
        }

        let (synthesized, synthesis) = self
            .synthesize(ctx, config, &successes)
            .await;

        let results: BTreeMap<String, AnalysisResult> = successes.into_iter().collect();
        Ok(ConsensusReport {
            results,
            failed,
            synthesized,
            synthesis,
        })
    }

    /// Ask the chair to merge; fall back to the first successful raw
    /// result when the chair's output cannot be used.
    async fn synthesize(
        &self,
        ctx: &AnalysisContext,
        config: &EngineConfig,
        successes: &[(String, AnalysisResult)],
    ) -> (AnalysisResult, SynthesisOutcome) {
        let chair = self.chair_capability(successes);
        let chair_id = chair.id().to_string();
        let builder = PromptBuilder::new(config.limits.prompt_char_budget);
        let prompt = builder.synthesis(successes);

        let fallback = |chair_id: String| {
            let (first_id, first_result) = &successes[0];
            (
                first_result.clone(),
                SynthesisOutcome::ChairFallback {
                    chair: chair_id,
                    fallback_to: first_id.clone(),
                },
            )
        };

        let response = match chair.invoke(&prompt, Stage::Synthesis.schema()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(chair = %chair_id, error = %err, "Chair invocation failed");
                return fallback(chair_id);
            }
        };

        let Some(output) = parse_stage_output::<SynthesisOutput>(&response.text) else {
            tracing::warn!(chair = %chair_id, "Chair output unparsable, falling back");
            return fallback(chair_id);
        };

        let chair_usage = ResourceUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            estimated_cost_usd: provider::estimate_cost(
                chair.model_name(),
                response.input_tokens,
                response.output_tokens,
            ),
            invocations: 1,
        };

        let synthesized = build_synthesized(ctx.title.clone(), output, successes, chair_usage);
        (synthesized, SynthesisOutcome::Chair { backend: chair_id })
    }

    /// Configured chair if it is among the backends, else the first
    /// successful backend's capability.
    fn chair_capability(
        &self,
        successes: &[(String, AnalysisResult)],
    ) -> Arc<dyn ModelCapability> {
        if let Some(chair_id) = &self.chair {
            if let Some(capability) = self.backends.iter().find(|b| b.id() == chair_id) {
                return capability.clone();
            }
            tracing::warn!(chair = %chair_id, "Configured chair not among backends, using first survivor");
        }
        let first_id = &successes[0].0;
        self.backends
            .iter()
            .find(|b| b.id() == first_id)
            .cloned()
            .unwrap_or_else(|| self.backends[0].clone())
    }
}

// ── Merge rules ──────────────────────────────────────────────────

/// Build the synthesized result from the chair's parsed output.
///
/// Rule (a): critical findings from any backend survive with severity
/// unchanged. Rule (b): complexity is the arithmetic mean of the
/// backends' scores — the chair does not get a vote on numbers.
fn build_synthesized(
    title: Option<String>,
    output: SynthesisOutput,
    successes: &[(String, AnalysisResult)],
    chair_usage: ResourceUsage,
) -> AnalysisResult {
    let mut findings: Vec<Finding> = output
        .findings
        .into_iter()
        .map(|raw| raw.into_finding(None))
        .collect();

    let mut seen: std::collections::HashSet<(String, String, String)> = findings
        .iter()
        .map(finding_key)
        .collect();

    for (backend, result) in successes {
        for finding in result.findings.iter().filter(|f| f.severity == Severity::Critical) {
            let key = finding_key(finding);
            if seen.insert(key) {
                tracing::debug!(
                    backend = %backend,
                    description = %finding.description,
                    "Restoring critical finding dropped by chair"
                );
                findings.push(finding.clone());
            }
        }
    }

    let count = successes.len() as f64;
    let mean_complexity =
        (successes.iter().map(|(_, r)| r.complexity as f64).sum::<f64>() / count).round() as u8;
    let mean_clarity =
        (successes.iter().map(|(_, r)| r.clarity as f64).sum::<f64>() / count).round() as u8;

    let mut usage = chair_usage;
    for (_, result) in successes {
        usage.absorb(result.usage);
    }

    AnalysisResult {
        run_id: uuid::Uuid::new_v4().to_string(),
        title,
        summary: output.summary,
        findings,
        file_analyses: Vec::new(),
        complexity: mean_complexity.clamp(1, 5),
        recommendations: output.recommendations,
        clarity: mean_clarity.min(100),
        iterations: successes.iter().map(|(_, r)| r.iterations).max().unwrap_or(0),
        usage,
        degraded: false,
        completed_at: chrono::Utc::now(),
    }
}

fn finding_key(finding: &Finding) -> (String, String, String) {
    (
        finding.category.label().to_string(),
        finding.file.clone().unwrap_or_default(),
        finding.description.clone(),
    )
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffParser;
    use crate::engine::types::{FindingCategory, ModeFlags, Provenance};
    use crate::error::CapabilityError;
    use crate::provider::ModelResponse;
    use async_trait::async_trait;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,1 +1,3 @@
 fn existing() {}
+fn one() {}
+fn two() {}
";

    fn context() -> AnalysisContext {
        let files = DiffParser::new(&[]).parse(DIFF);
        AnalysisContext {
            diff_text: DIFF.to_string(),
            title: Some("consensus test".into()),
            description: None,
            files,
            token_budget: 1_000_000,
            cost_ceiling_usd: 100.0,
            flags: ModeFlags::default(),
            external_context: None,
            mode: ExecutionMode::Execute,
        }
    }

    /// Backend stub: optionally fails outright, optionally reports a
    /// critical risk finding, optionally garbles synthesis output.
    struct Backend {
        id: String,
        fail: bool,
        critical_risk: Option<&'static str>,
        garble_synthesis: bool,
        drop_findings_in_synthesis: bool,
    }

    impl Backend {
        fn healthy(id: &str) -> Self {
            Self {
                id: id.into(),
                fail: false,
                critical_risk: None,
                garble_synthesis: false,
                drop_findings_in_synthesis: false,
            }
        }

        fn timing_out(id: &str) -> Self {
            Self {
                fail: true,
                ..Self::healthy(id)
            }
        }
    }

    #[async_trait]
    impl ModelCapability for Backend {
        fn id(&self) -> &str {
            &self.id
        }

        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn invoke(
            &self,
            _prompt: &str,
            schema_hint: &str,
        ) -> Result<ModelResponse, CapabilityError> {
            if self.fail {
                return Err(CapabilityError::Timeout);
            }

            let text = if schema_hint.contains("reconciled") {
                if self.garble_synthesis {
                    "certainly! here is my synthesis, in prose".to_string()
                } else if self.drop_findings_in_synthesis {
                    r#"{"summary": "merged view", "recommendations": ["align error handling"], "findings": []}"#
                        .to_string()
                } else {
                    r#"{"summary": "merged view", "recommendations": [], "findings": []}"#.to_string()
                }
            } else if schema_hint.contains("clarity") {
                r#"{"clarity": 90, "missing": []}"#.to_string()
            } else if schema_hint.contains("complexity") {
                r#"{"summary": "file ok", "complexity": 1, "findings": []}"#.to_string()
            } else if schema_hint.contains("recommendations") {
                format!(r#"{{"summary": "view from {}", "recommendations": []}}"#, self.id)
            } else {
                // Risk stage.
                match self.critical_risk {
                    Some(desc) => format!(
                        r#"{{"findings": [{{"severity": "critical", "category": "security", "file": "src/lib.rs", "description": "{desc}"}}]}}"#,
                    ),
                    None => r#"{"findings": []}"#.to_string(),
                }
            };

            Ok(ModelResponse {
                text,
                input_tokens: 50,
                output_tokens: 10,
            })
        }
    }

    fn aggregator(backends: Vec<Backend>, chair: Option<&str>) -> ConsensusAggregator {
        ConsensusAggregator::new(
            backends
                .into_iter()
                .map(|b| Arc::new(b) as Arc<dyn ModelCapability>)
                .collect(),
            chair.map(String::from),
        )
    }

    #[tokio::test]
    async fn one_timeout_leaves_two_survivors() {
        let agg = aggregator(
            vec![
                Backend::healthy("a"),
                Backend::timing_out("b"),
                Backend::healthy("c"),
            ],
            Some("a"),
        );
        let report = agg.run(&context(), &EngineConfig::default()).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(report.results.contains_key("a"));
        assert!(report.results.contains_key("c"));
        assert_eq!(report.failed, vec!["b".to_string()]);
        assert!(matches!(report.synthesis, SynthesisOutcome::Chair { .. }));
    }

    #[tokio::test]
    async fn critical_finding_survives_chair_omission() {
        let mut chair = Backend::healthy("a");
        chair.drop_findings_in_synthesis = true;
        let mut other = Backend::healthy("b");
        other.critical_risk = Some("token written to world-readable log");

        let agg = aggregator(vec![chair, other], Some("a"));
        let report = agg.run(&context(), &EngineConfig::default()).await.unwrap();

        let preserved: Vec<_> = report
            .synthesized
            .findings
            .iter()
            .filter(|f| f.description.contains("world-readable"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(preserved[0].severity, Severity::Critical);
        assert_eq!(preserved[0].category, FindingCategory::Security);
    }

    #[tokio::test]
    async fn chair_garbage_falls_back_to_first_survivor() {
        let mut chair = Backend::healthy("a");
        chair.garble_synthesis = true;
        let agg = aggregator(vec![chair, Backend::healthy("b")], Some("a"));
        let report = agg.run(&context(), &EngineConfig::default()).await.unwrap();

        match &report.synthesis {
            SynthesisOutcome::ChairFallback { chair, fallback_to } => {
                assert_eq!(chair, "a");
                assert_eq!(fallback_to, "a");
            }
            other => panic!("expected chair fallback, got {other:?}"),
        }
        // The fallback is backend a's raw result, untouched.
        assert_eq!(report.synthesized.run_id, report.results["a"].run_id);
    }

    #[tokio::test]
    async fn single_survivor_is_returned_unmodified() {
        let agg = aggregator(
            vec![Backend::timing_out("a"), Backend::healthy("b")],
            Some("a"),
        );
        let report = agg.run(&context(), &EngineConfig::default()).await.unwrap();

        assert_eq!(
            report.synthesis,
            SynthesisOutcome::SoleSurvivor {
                backend: "b".into()
            }
        );
        assert_eq!(report.synthesized.run_id, report.results["b"].run_id);
        assert_eq!(report.failed, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn all_backends_failing_is_a_hard_error() {
        let agg = aggregator(
            vec![Backend::timing_out("a"), Backend::timing_out("b")],
            None,
        );
        let err = agg.run(&context(), &EngineConfig::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::AllBackendsFailed { attempted: 2 }));
    }

    #[tokio::test]
    async fn no_backends_is_a_hard_error() {
        let agg = ConsensusAggregator::new(vec![], None);
        let err = agg.run(&context(), &EngineConfig::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::AllBackendsFailed { attempted: 0 }));
    }

    fn result_with(complexity: u8, clarity: u8, findings: Vec<Finding>) -> AnalysisResult {
        AnalysisResult {
            run_id: uuid::Uuid::new_v4().to_string(),
            title: None,
            summary: "view".into(),
            findings,
            file_analyses: Vec::new(),
            complexity,
            recommendations: Vec::new(),
            clarity,
            iterations: 0,
            usage: ResourceUsage::default(),
            degraded: false,
            completed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn complexity_is_averaged_not_voted() {
        let successes = vec![
            ("a".to_string(), result_with(2, 80, vec![])),
            ("b".to_string(), result_with(5, 60, vec![])),
            ("c".to_string(), result_with(2, 70, vec![])),
        ];
        let output = SynthesisOutput {
            summary: "merged".into(),
            recommendations: vec![],
            findings: vec![],
        };
        let merged = build_synthesized(None, output, &successes, ResourceUsage::default());
        // mean(2, 5, 2) = 3, even though 2 would win a vote.
        assert_eq!(merged.complexity, 3);
        assert_eq!(merged.clarity, 70);
    }

    #[test]
    fn duplicate_criticals_are_deduplicated_once() {
        let critical = Finding {
            category: FindingCategory::Security,
            severity: Severity::Critical,
            description: "hardcoded key".into(),
            file: Some("src/cfg.rs".into()),
            line: Some(3),
            provenance: Provenance::Model,
        };
        let successes = vec![
            ("a".to_string(), result_with(2, 80, vec![critical.clone()])),
            ("b".to_string(), result_with(2, 80, vec![critical.clone()])),
        ];
        let output = SynthesisOutput::default();
        let merged = build_synthesized(None, output, &successes, ResourceUsage::default());
        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.findings[0].severity, Severity::Critical);
    }
}
