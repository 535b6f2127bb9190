//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur within the pipeline system.
///
/// Queue termination is deliberately absent: it is the normal end-of-stream
/// signal and is reported through [`QueueStatus`](crate::pipeline::QueueStatus)
/// or `Option`, never as an error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Malformed duplex read id '{0}': expected '<template>;<complement>'")]
    MalformedDuplexId(String),

    #[error("Invalid base '{base}' at position {position} in read {read_id}")]
    InvalidSequence {
        read_id: String,
        position: usize,
        base: char,
    },

    #[error("Sink '{0}' has been terminated")]
    SinkTerminated(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker thread '{0}' panicked")]
    WorkerPanicked(String),

    #[error("Node '{0}' is not running")]
    NotRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error is a contract violation by the data flowing in,
    /// as opposed to a failure of the pipeline machinery itself.
    pub fn is_input_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedDuplexId(_) | PipelineError::InvalidSequence { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::MalformedDuplexId("abc".to_string());
        assert!(err.to_string().contains("'abc'"));

        let err = PipelineError::InvalidSequence {
            read_id: "r1".to_string(),
            position: 3,
            base: 'N',
        };
        assert_eq!(err.to_string(), "Invalid base 'N' at position 3 in read r1");
    }

    #[test]
    fn test_input_violation_classification() {
        assert!(PipelineError::MalformedDuplexId("x".into()).is_input_violation());
        assert!(!PipelineError::SinkTerminated("x".into()).is_input_violation());
        assert!(!PipelineError::Runner("x".into()).is_input_violation());
    }
}
