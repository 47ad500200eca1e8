use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write '{path}': {reason}")]
    Write { path: String, reason: String },

    #[error("include depth exceeded ({max_depth}) while reading '{path}'")]
    MaxDepthExceeded { path: String, max_depth: u32 },

    #[error("recursive include detected at '{path}'")]
    RecursiveInclude { path: String },

    #[error("recursive section include detected for section '{section}'")]
    RecursiveSectionInclude { section: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
