//! Error taxonomy for the analysis engine.
//!
//! Defects internal to a single file or stage are absorbed at the point
//! they occur (logged, replaced with schema defaults) and never surface
//! here. Only two conditions reach the caller as errors: running in
//! execute mode with no model capability at all, and a consensus run in
//! which every backend failed.

use thiserror::Error;

/// Failure to invoke a model capability.
///
/// Timeouts are deliberately indistinguishable from other invocation
/// failures at the stage boundary: both yield a degraded default.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("no credentials configured for provider '{provider}'")]
    MissingCredentials { provider: &'static str },

    #[error("model request failed: {0}")]
    Http(reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model invocation timed out")]
    Timeout,

    #[error("model returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

/// Hard failures of an engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Execute mode was requested but no model capability was supplied.
    #[error("execute mode requires a configured model capability")]
    NoCapability,

    /// Every consensus backend failed; there is nothing to fall back to.
    #[error("all {attempted} consensus backend(s) failed")]
    AllBackendsFailed { attempted: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_messages() {
        let err = CapabilityError::MissingCredentials { provider: "gemini" };
        assert!(err.to_string().contains("gemini"));

        let err = CapabilityError::Status {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn engine_error_messages() {
        let err = EngineError::AllBackendsFailed { attempted: 3 };
        assert!(err.to_string().contains('3'));
    }
}
