use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("shared object '{0}' already exists")]
    AlreadyExists(String),

    #[error("shared object '{0}' not found")]
    NotFound(String),

    #[error("object graph contains a cycle, refusing to store '{0}'")]
    CyclicObject(String),
}

pub type SharedResult<T> = Result<T, SharedError>;
