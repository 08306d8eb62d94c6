//! Persistence sink boundary.
//!
//! The engine hands a flattened result — scalars plus JSON-encoded
//! arrays — to whatever sink the host wires in. It has no knowledge of
//! how or where the row is stored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::AnalysisResult;

/// Storage-friendly projection of an [`AnalysisResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatResult {
    pub run_id: String,
    pub title: Option<String>,
    pub summary: String,
    pub complexity: u8,
    pub clarity: u8,
    pub iterations: u32,
    pub degraded: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    /// JSON-encoded `Vec<Finding>`.
    pub findings_json: String,
    /// JSON-encoded `Vec<String>`.
    pub recommendations_json: String,
    /// RFC 3339 completion timestamp.
    pub completed_at: String,
}

impl FlatResult {
    pub fn from_result(result: &AnalysisResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            title: result.title.clone(),
            summary: result.summary.clone(),
            complexity: result.complexity,
            clarity: result.clarity,
            iterations: result.iterations,
            degraded: result.degraded,
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
            estimated_cost_usd: result.usage.estimated_cost_usd,
            findings_json: serde_json::to_string(&result.findings).unwrap_or_else(|_| "[]".into()),
            recommendations_json: serde_json::to_string(&result.recommendations)
                .unwrap_or_else(|_| "[]".into()),
            completed_at: result.completed_at.to_rfc3339(),
        }
    }
}

/// Accepts flattened results for storage.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, row: &FlatResult) -> anyhow::Result<()>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{
        Finding, FindingCategory, Provenance, Severity, WorkflowState,
    };
    use std::sync::Mutex;

    struct RecordingSink {
        rows: Mutex<Vec<FlatResult>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn store(&self, row: &FlatResult) -> anyhow::Result<()> {
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }
    }

    #[test]
    fn flatten_encodes_arrays_as_json() {
        let mut state = WorkflowState {
            summary: "summary".into(),
            complexity: 3,
            recommendations: vec!["do better".into()],
            ..Default::default()
        };
        state.findings.push(Finding {
            category: FindingCategory::Quality,
            severity: Severity::Warning,
            description: "long function".into(),
            file: None,
            line: None,
            provenance: Provenance::Model,
        });
        let result = AnalysisResult::from_state(None, &state);
        let flat = FlatResult::from_result(&result);

        let findings: Vec<Finding> = serde_json::from_str(&flat.findings_json).unwrap();
        assert_eq!(findings.len(), 1);
        let recs: Vec<String> = serde_json::from_str(&flat.recommendations_json).unwrap();
        assert_eq!(recs, vec!["do better".to_string()]);
        assert_eq!(flat.complexity, 3);
    }

    #[tokio::test]
    async fn sink_receives_flattened_rows() {
        let sink = RecordingSink {
            rows: Mutex::new(Vec::new()),
        };
        let result = AnalysisResult::from_state(None, &WorkflowState::default());
        sink.store(&FlatResult::from_result(&result)).await.unwrap();
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
    }
}
