use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("message is detached")]
    Detached,

    #[error("message is frozen")]
    Frozen,

    #[error("handle filter set does not match for uninstall")]
    FilterMismatch,

    #[error("no handler named '{0}' installed")]
    NotInstalled(String),
}

pub type BusResult<T> = Result<T, BusError>;
