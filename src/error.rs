use thiserror::Error;

/// Aggregates every component error behind one facade-level type, the
/// way a top-level crate collects its dependents' errors rather than
/// inventing a parallel hierarchy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] pbx_config::error::ConfigError),

    #[error(transparent)]
    Bus(#[from] pbx_bus::error::BusError),

    #[error(transparent)]
    Runtime(#[from] pbx_runtime::error::RuntimeError),

    #[error(transparent)]
    Shared(#[from] pbx_shared::error::SharedError),

    #[error(transparent)]
    Core(#[from] pbx_core::error::CoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
