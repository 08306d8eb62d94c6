//! Peer-review collaborator boundary.
//!
//! An optional external subsystem that, given a run's summary and
//! risks plus a ticket reference, returns its own verdict. The engine
//! only passes its output downstream and accepts an opaque structured
//! verdict back; it never interprets the payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::{AnalysisResult, Finding, Severity};

/// What the engine forwards to a peer reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReviewRequest {
    /// Ticket or issue reference, if the host tracks one.
    pub ticket: Option<String>,
    pub summary: String,
    /// Risk findings only (warning and critical).
    pub risks: Vec<Finding>,
}

impl PeerReviewRequest {
    pub fn from_result(result: &AnalysisResult, ticket: Option<String>) -> Self {
        Self {
            ticket,
            summary: result.summary.clone(),
            risks: result
                .findings
                .iter()
                .filter(|f| f.severity >= Severity::Warning)
                .cloned()
                .collect(),
        }
    }
}

/// Opaque verdict returned by the collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerVerdict {
    /// Collaborator-defined status label.
    pub status: String,
    /// Collaborator-defined structured payload, passed through as-is.
    pub payload: serde_json::Value,
}

/// External peer-review subsystem.
#[async_trait]
pub trait PeerReviewer: Send + Sync {
    async fn review(&self, request: &PeerReviewRequest) -> anyhow::Result<PeerVerdict>;
}

// ── Tests ────────────────────────────────────────────────────────
