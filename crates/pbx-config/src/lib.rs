//! Hierarchical `.ini`-like configuration loader: the global script catalog
//! and related host config share this parser.

pub mod enabled;
pub mod error;
pub mod loader;
pub mod model;

pub mod prelude {
    pub use crate::error::{ConfigError, ConfigResult};
    pub use crate::loader::{Loader, LoaderOptions};
    pub use crate::model::{ConfigFile, Section};
}
