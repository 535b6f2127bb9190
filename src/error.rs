//! Error handling for readpipe
//!
//! [`ReadPipeError`] covers everything outside the running pipeline
//! (configuration, read I/O, serialization) and wraps
//! [`PipelineError`] for failures raised by nodes.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for readpipe operations
#[derive(Error, Debug)]
pub enum ReadPipeError {
    /// Errors raised by pipeline nodes
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors (config files, read records)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReadPipeError>,
    },
}

impl ReadPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReadPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for ReadPipeError {
    fn from(err: serde_json::Error) -> Self {
        ReadPipeError::Serialization(err.to_string())
    }
}

/// Result type alias for readpipe operations
pub type Result<T> = std::result::Result<T, ReadPipeError>;
