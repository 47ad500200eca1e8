use thiserror::Error;

/// Errors raised by the runner, context and native bridge layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("assignment to frozen object rejected")]
    FrozenAssign,

    #[error("context '{0}' has been terminated")]
    ContextTerminated(String),

    #[error("argument count {found} outside [{min}, {max}] for native call")]
    ArgCount { min: usize, max: usize, found: usize },

    #[error("required field '{0}' is missing or null")]
    RequiredFieldMissing(String),

    #[error("unknown native method '{0}'")]
    UnknownNative(String),

    #[error("native object is detached")]
    Detached,

    #[error("runner is not in a resumable state (current state: {0:?})")]
    NotResumable(crate::runner::RunnerState),

    #[error("compiled code failed to produce a runner: {0}")]
    RunnerCreation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
