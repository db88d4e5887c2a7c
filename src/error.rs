//! Error handling for the documentation pipeline.

use thiserror::Error;

/// Result type alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Crate-wide error type. Variants mirror the error taxonomy the orchestrator
/// uses to decide whether to retry, degrade, or fail a job.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad input: malformed repo reference, empty corpus, budgets exceeded.
    #[error("validation failed in {phase}: {message}")]
    Validation { phase: &'static str, message: String },

    /// Missing index, checkpoint, or repository.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeouts, 5xx, or connection drops against an external collaborator.
    /// Retried internally up to the configured attempt count before this
    /// variant ever escapes a subsystem.
    #[error("transient failure calling {endpoint}: {message}")]
    Transient { endpoint: &'static str, message: String },

    /// The endpoint answered but can't serve the request (model not loaded,
    /// 400 on chat, auth rejected).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A degradation that the caller should log and carry as a warning/stub
    /// rather than fail the job. Kept as a typed variant so call sites that
    /// need to distinguish it from a fatal error can match on it, even
    /// though most callers only use it to build a warning string.
    #[error("partial failure in {phase}: {message}")]
    PartialFailure { phase: &'static str, message: String },

    /// Invariant violation: dimension mismatch, metadata/index length
    /// mismatch, or any other condition that indicates a logic bug rather
    /// than bad input or a bad upstream.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    pub fn validation(phase: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Validation { phase, message: message.into() }
    }

    pub fn transient(endpoint: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Transient { endpoint, message: message.into() }
    }

    pub fn partial(phase: &'static str, message: impl Into<String>) -> Self {
        PipelineError::PartialFailure { phase, message: message.into() }
    }

    /// Whether a subsystem should retry this error internally (never true
    /// once it has already exhausted its own retry budget, since by then
    /// it has been re-raised as `Transient` to its caller as a terminal
    /// condition for that call site).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient { .. } | PipelineError::Http(_)
        )
    }

    /// Stable category name, matching the §7 taxonomy, for structured
    /// logging and for the error code surfaced on a failed `GenerationJob`.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "validation_failure",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Transient { .. } => "transient",
            PipelineError::UpstreamUnavailable(_) => "upstream_unavailable",
            PipelineError::PartialFailure { .. } => "partial_failure",
            PipelineError::Internal(_) => "internal",
            PipelineError::Io(_) => "internal",
            PipelineError::Serialization(_) => "internal",
            PipelineError::Http(_) => "transient",
            PipelineError::Database(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = PipelineError::transient("embedder", "connection reset");
        assert!(err.is_retryable());
        assert_eq!(err.category(), "transient");
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = PipelineError::validation("ingesting", "empty corpus");
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "validation_failure");
    }

    #[test]
    fn internal_errors_carry_their_category() {
        let err = PipelineError::Internal("index/metadata length mismatch".into());
        assert_eq!(err.category(), "internal");
        assert!(!err.is_retryable());
    }
}
