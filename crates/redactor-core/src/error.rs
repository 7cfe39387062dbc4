use thiserror::Error;

use crate::pipeline::PipelineState;

#[derive(Error, Debug)]
pub enum RedactError {
    #[error("No document loaded")]
    DocumentNotLoaded,

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Redaction pipeline aborted in {stage} state: {reason}")]
    PipelineAborted {
        stage: PipelineState,
        reason: String,
    },

    #[error("Document engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown redaction: {0}")]
    UnknownRedaction(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl RedactError {
    /// Wrap a stage failure so callers only ever see an aborted run.
    pub fn aborted(stage: PipelineState, err: RedactError) -> Self {
        match err {
            RedactError::PipelineAborted { .. } => err,
            other => RedactError::PipelineAborted {
                stage,
                reason: other.to_string(),
            },
        }
    }

    /// Errors the caller can fix by changing the request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RedactError::InvalidRegion(_)
                | RedactError::InvalidRange(_)
                | RedactError::UnknownRedaction(_)
        )
    }
}

impl From<lopdf::Error> for RedactError {
    fn from(e: lopdf::Error) -> Self {
        RedactError::OperationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RedactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_wraps_once() {
        let inner = RedactError::aborted(PipelineState::Staged, RedactError::OperationError("boom".into()));
        let outer = RedactError::aborted(PipelineState::Applied, inner);
        match outer {
            RedactError::PipelineAborted { stage, reason } => {
                assert_eq!(stage, PipelineState::Staged);
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_caller_errors() {
        assert!(RedactError::InvalidRegion("x".into()).is_caller_error());
        assert!(!RedactError::DocumentNotLoaded.is_caller_error());
        assert!(!RedactError::EngineUnavailable("gone".into()).is_caller_error());
    }
}
