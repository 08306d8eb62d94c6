//! The iterative refinement state machine.
//!
//! Drives one analysis run through its ordered phases:
//!
//! ```text
//! INIT → ANALYZE_FILES → DETECT_RISKS → SCORE_COMPLEXITY → SUMMARIZE
//!      → EVALUATE → { REFINE → SUMMARIZE | FINALIZE }
//! ```
//!
//! The controller is the sole owner and single writer of
//! [`WorkflowState`]: per-file stages may execute concurrently, but
//! their results are folded in on the controller task as each join
//! completes. Termination is bounded by the iteration cap, never by
//! the clarity trend — an oscillating or stuck clarity score cannot
//! keep the loop alive. `FINALIZE` always terminates the run,
//! successful or not.

use std::collections::VecDeque;
use tokio::task::JoinSet;

use crate::config::{EngineConfig, LimitsConfig, RefinementConfig};
use crate::engine::prompts::PromptBuilder;
use crate::engine::stage::{
    EvaluationOutput, FileAnalysisOutput, RiskOutput, Stage, StageExecutor, StageRun, SummaryOutput,
};
use crate::engine::types::{
    AnalysisContext, AnalysisResult, ExecutionMode, FileAnalysis, PromptDescriptor, PromptPlan,
    RunOutcome, WorkflowState,
};
use crate::heuristics::{ComplexityScorer, RiskDetector};
use crate::provider::ModelCapability;

// ── Phases ───────────────────────────────────────────────────────

/// Execution phases of one run. There is no unreachable state:
/// every phase leads to `Finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AnalyzeFiles,
    DetectRisks,
    ScoreComplexity,
    Summarize,
    Evaluate,
    Refine,
    Finalize,
}

// ── Controller ───────────────────────────────────────────────────

/// Sequences stages for one analysis run and owns its state.
pub struct RefinementController {
    ctx: AnalysisContext,
    refinement: RefinementConfig,
    limits: LimitsConfig,
    builder: PromptBuilder,
    executor: StageExecutor,
    state: WorkflowState,
    /// Descriptors collected in prompt-only mode, in execution order.
    plan: Vec<PromptDescriptor>,
}

impl RefinementController {
    pub fn new(
        ctx: AnalysisContext,
        config: &EngineConfig,
        capability: Option<std::sync::Arc<dyn ModelCapability>>,
    ) -> Self {
        let executor = StageExecutor::new(ctx.mode, capability);
        Self {
            builder: PromptBuilder::new(config.limits.prompt_char_budget),
            refinement: config.refinement.clone(),
            limits: config.limits.clone(),
            executor,
            ctx,
            state: WorkflowState::default(),
            plan: Vec::new(),
        }
    }

    /// Drive the run to completion. Always reaches `Finalize`.
    pub async fn run(mut self) -> RunOutcome {
        let mut phase = Phase::Init;
        loop {
            tracing::debug!(phase = ?phase, iteration = self.state.iteration, "Entering phase");
            let completed = phase;
            match phase {
                Phase::Init => {}
                Phase::AnalyzeFiles => self.analyze_files().await,
                Phase::DetectRisks => self.detect_risks().await,
                Phase::ScoreComplexity => self.score_complexity(),
                Phase::Summarize => self.summarize().await,
                Phase::Evaluate => self.evaluate().await,
                Phase::Refine => self.state.iteration += 1,
                Phase::Finalize => break,
            }

            phase = self.next_phase(completed);

            // Budget exhaustion stops new model stages; deterministic
            // work already done stays in the state.
            if self.budget_exhausted()
                && matches!(phase, Phase::Summarize | Phase::Evaluate | Phase::Refine)
            {
                tracing::info!(
                    cost_usd = self.state.usage.estimated_cost_usd,
                    tokens = self.state.usage.total_tokens(),
                    "Budget exhausted, finalizing with partial state"
                );
                phase = Phase::Finalize;
            }
        }

        self.finalize()
    }

    /// Pure transition function over the completed phase and current
    /// state.
    pub fn next_phase(&self, completed: Phase) -> Phase {
        match completed {
            Phase::Init => Phase::AnalyzeFiles,
            Phase::AnalyzeFiles => Phase::DetectRisks,
            Phase::DetectRisks => Phase::ScoreComplexity,
            Phase::ScoreComplexity => Phase::Summarize,
            Phase::Summarize => {
                if !self.ctx.flags.summary || self.takes_fast_path() {
                    Phase::Finalize
                } else {
                    Phase::Evaluate
                }
            }
            Phase::Evaluate => match self.ctx.mode {
                // The plan enumerates a single pass; looping is the
                // external executor's call.
                ExecutionMode::PromptOnly => Phase::Finalize,
                ExecutionMode::Execute => {
                    if self.state.clarity < self.refinement.clarity_threshold
                        && self.state.iteration < self.refinement.max_iterations
                    {
                        Phase::Refine
                    } else {
                        Phase::Finalize
                    }
                }
            },
            Phase::Refine => Phase::Summarize,
            Phase::Finalize => Phase::Finalize,
        }
    }

    /// Small inputs skip evaluate/refine entirely, trading refinement
    /// quality for latency and cost.
    fn takes_fast_path(&self) -> bool {
        self.ctx.files.len() <= self.refinement.fast_path_max_files
            && self.ctx.diff_text.len() <= self.refinement.fast_path_max_diff_bytes
    }

    fn budget_exhausted(&self) -> bool {
        self.state.usage.estimated_cost_usd >= self.ctx.cost_ceiling_usd
            || self.state.usage.total_tokens() >= self.ctx.token_budget
    }

    // ── ANALYZE_FILES ────────────────────────────────────────────

    /// Per-file analysis. Execute mode fans out with bounded
    /// parallelism and joins every launched unit; prompt-only mode
    /// enumerates descriptors sequentially.
    async fn analyze_files(&mut self) {
        if self.ctx.files.is_empty() {
            return;
        }

        if self.ctx.mode == ExecutionMode::PromptOnly {
            for file in &self.ctx.files {
                let prompt = self.builder.file_analysis(&self.ctx, file);
                if let Ok(run) = self
                    .executor
                    .run::<FileAnalysisOutput>(Stage::FileAnalysis, prompt)
                    .await
                {
                    if let Some(descriptor) = run.into_descriptor() {
                        self.plan.push(descriptor);
                    }
                }
            }
            return;
        }

        let mut pending: VecDeque<_> = self.ctx.files.clone().into();
        let parallelism = self.limits.parallelism.max(1);
        let mut set = JoinSet::new();

        loop {
            // Launch up to the parallelism cap; stop launching once the
            // budget is gone, but keep joining what is already in flight.
            while set.len() < parallelism && !self.budget_exhausted() {
                let Some(file) = pending.pop_front() else {
                    break;
                };
                let prompt = self.builder.file_analysis(&self.ctx, &file);
                let executor = self.executor.clone();
                let path = file.path.clone();
                set.spawn(async move {
                    let outcome = executor
                        .run::<FileAnalysisOutput>(Stage::FileAnalysis, prompt)
                        .await;
                    (path, outcome)
                });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };

            match joined {
                Ok((path, Ok(StageRun::Output { value, usage }))) => {
                    self.state.usage.absorb(usage);
                    self.apply_file_analysis(&path, value);
                }
                Ok((path, Ok(StageRun::Descriptor(_)))) => {
                    // Cannot happen in execute mode; tolerate anyway.
                    self.state
                        .file_analyses
                        .insert(path.clone(), FileAnalysis::degraded_for(&path));
                }
                Ok((path, Err(err))) => {
                    tracing::warn!(
                        path = %path,
                        error = %err,
                        "File analysis failed, substituting degraded default"
                    );
                    self.state
                        .file_analyses
                        .insert(path.clone(), FileAnalysis::degraded_for(&path));
                }
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "File analysis task aborted");
                }
            }
        }

        // Files never launched because the budget ran out.
        for file in pending {
            self.state
                .file_analyses
                .insert(file.path.clone(), FileAnalysis::degraded_for(&file.path));
        }
    }

    fn apply_file_analysis(&mut self, path: &str, output: FileAnalysisOutput) {
        let findings: Vec<_> = output
            .findings
            .into_iter()
            .map(|raw| raw.into_finding(Some(path)))
            .collect();
        self.state.findings.extend(findings.iter().cloned());
        self.state.file_analyses.insert(
            path.to_string(),
            FileAnalysis {
                path: path.to_string(),
                summary: output.summary,
                complexity: output.complexity.clamp(1, 5),
                findings,
                degraded: false,
            },
        );
    }

    // ── DETECT_RISKS ─────────────────────────────────────────────

    /// Pattern analyzers always run; the model-derived pass layers on
    /// top when the risk stage is enabled. The two sets are
    /// concatenated, never deduplicated here.
    async fn detect_risks(&mut self) {
        let heuristic = RiskDetector::detect_all(&self.ctx.files);
        tracing::debug!(count = heuristic.len(), "Heuristic risk findings");
        self.state.findings.extend(heuristic.iter().cloned());

        if !self.ctx.flags.risks || self.budget_exhausted() {
            return;
        }

        let prompt = self.builder.risk_detection(&self.ctx, &heuristic);
        match self
            .executor
            .run::<RiskOutput>(Stage::RiskDetection, prompt)
            .await
        {
            Ok(StageRun::Output { value, usage }) => {
                self.state.usage.absorb(usage);
                self.state
                    .findings
                    .extend(value.findings.into_iter().map(|raw| raw.into_finding(None)));
            }
            Ok(StageRun::Descriptor(descriptor)) => self.plan.push(descriptor),
            Err(err) => {
                tracing::warn!(error = %err, "Model risk pass failed, keeping heuristic findings only");
            }
        }
    }

    // ── SCORE_COMPLEXITY ─────────────────────────────────────────

    fn score_complexity(&mut self) {
        self.state.complexity = if self.ctx.flags.complexity {
            ComplexityScorer::score(&self.ctx.files)
        } else {
            1
        };
    }

    // ── SUMMARIZE ────────────────────────────────────────────────

    /// Refreshes the running summary and recommendations. A total
    /// failure here marks the run degraded; accumulated state is kept.
    async fn summarize(&mut self) {
        if !self.ctx.flags.summary {
            return;
        }

        let prompt = self.builder.summary(&self.ctx, &self.state);
        match self
            .executor
            .run::<SummaryOutput>(Stage::Summary, prompt)
            .await
        {
            Ok(StageRun::Output { value, usage }) => {
                self.state.usage.absorb(usage);
                self.state.summary = value.summary;
                self.state.recommendations = value.recommendations;
            }
            Ok(StageRun::Descriptor(descriptor)) => self.plan.push(descriptor),
            Err(err) => {
                tracing::warn!(error = %err, "Summary stage failed, finalizing degraded");
                self.state.degraded = true;
            }
        }
    }

    // ── EVALUATE ─────────────────────────────────────────────────

    /// Clarity is a stage output, not a heuristic: the model judges
    /// its own completeness. A failed evaluation scores 100 so a dead
    /// capability cannot keep the loop alive.
    async fn evaluate(&mut self) {
        let prompt = self.builder.evaluation(&self.ctx, &self.state);
        match self
            .executor
            .run::<EvaluationOutput>(Stage::Evaluation, prompt)
            .await
        {
            Ok(StageRun::Output { value, usage }) => {
                self.state.usage.absorb(usage);
                self.state.clarity = value.clarity.min(100);
                self.state.missing_info = value.missing;
            }
            Ok(StageRun::Descriptor(descriptor)) => self.plan.push(descriptor),
            Err(err) => {
                tracing::warn!(error = %err, "Evaluation stage failed, ending refinement");
                self.state.clarity = 100;
                self.state.missing_info.clear();
            }
        }
    }

    // ── FINALIZE ─────────────────────────────────────────────────

    fn finalize(self) -> RunOutcome {
        match self.ctx.mode {
            ExecutionMode::Execute => {
                let result = AnalysisResult::from_state(self.ctx.title.clone(), &self.state);
                tracing::info!(
                    run_id = %result.run_id,
                    findings = result.findings.len(),
                    complexity = result.complexity,
                    iterations = result.iterations,
                    degraded = result.degraded,
                    "Analysis run finalized"
                );
                RunOutcome::Completed(result)
            }
            ExecutionMode::PromptOnly => {
                let plan = PromptPlan {
                    run_id: uuid::Uuid::new_v4().to_string(),
                    title: self.ctx.title.clone(),
                    prompts: self.plan,
                    heuristic_findings: self.state.findings.clone(),
                    complexity: self.state.complexity.clamp(1, 5),
                    files: self.ctx.files.iter().map(|f| f.path.clone()).collect(),
                };
                tracing::info!(
                    run_id = %plan.run_id,
                    prompts = plan.prompts.len(),
                    "Prompt plan finalized"
                );
                RunOutcome::Planned(plan)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
