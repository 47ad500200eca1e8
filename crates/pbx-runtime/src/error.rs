use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("script '{0}' not found in the catalog")]
    NotFound(String),

    #[error("failed to parse '{file}': {reason}")]
    ParseFailed { file: String, reason: String },

    #[error("script execution failed: {0}")]
    ExecutionFailed(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
