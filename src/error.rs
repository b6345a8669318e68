//! Typed pipeline errors.
//!
//! | Variant | Meaning | Retry policy |
//! |---------|---------|--------------|
//! | [`Transport`](PipelineError::Transport) | network or proxy failure | proxy → direct once, then surfaced |
//! | [`ContentTooShort`](PipelineError::ContentTooShort) | page loaded, no usable article | terminal for that URL |
//! | [`ProviderResponse`](PipelineError::ProviderResponse) | AI output failed validation | one relaxed retry, then surfaced |
//! | [`Configuration`](PipelineError::Configuration) | required role has no model | surfaced immediately |
//! | [`NotFound`](PipelineError::NotFound) | unknown id or key | surfaced immediately |
//! | [`Invalid`](PipelineError::Invalid) | caller input failed validation | surfaced immediately |
//! | [`Busy`](PipelineError::Busy) | task already running here | caller retries later |
//!
//! A duplicate dedup key is not an error; it is
//! [`IngestOutcome::Duplicate`](newsroom_core::store::IngestOutcome::Duplicate).
//!
//! Everything else is carried as `anyhow::Error`. Call sites that need to
//! branch on the kind use [`PipelineError::classify`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("content too short: {chars} chars (minimum {min})")]
    ContentTooShort { chars: usize, min: usize },

    #[error("InvalidAiResponse: {0}")]
    ProviderResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("task {0} is already running")]
    Busy(i64),
}

impl PipelineError {
    /// Find the first `PipelineError` in an error chain.
    pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
    }

    pub fn is_transport(err: &anyhow::Error) -> bool {
        matches!(Self::classify(err), Some(PipelineError::Transport(_)))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        PipelineError::Invalid(message.into())
    }

    pub fn missing_role(role: &str) -> Self {
        PipelineError::Configuration(format!("no {} model is configured", role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Result<()> = Err(PipelineError::Transport("ERR_EMPTY_RESPONSE".into()).into());
        let err = err.context("loading page").unwrap_err();
        assert!(PipelineError::is_transport(&err));
    }

    #[test]
    fn test_display_names_invalid_response() {
        let e = PipelineError::ProviderResponse("missing summary".into());
        assert_eq!(e.to_string(), "InvalidAiResponse: missing summary");
    }
}
