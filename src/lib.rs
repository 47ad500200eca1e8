//! Facade tying the configuration loader, shared state, message bus and
//! script runtime crates together into one engine object: bus handlers,
//! shared variable bags, shared objects and the script catalog all live
//! behind this one type.

pub mod error;
pub mod forking;

use pbx_bus::prelude::Bus;
use pbx_config::loader::{Loader, LoaderOptions};
use pbx_config::model::ConfigFile;
use pbx_runtime::prelude::ScriptManager;
use pbx_shared::prelude::{SharedObjectRegistry, SharedVarsStore};
use std::path::Path;
use std::sync::Arc;

pub use error::{EngineError, EngineResult};

/// The running engine: message bus, shared variable/object stores and the
/// global script catalog, all ref-counted so native bridge objects can
/// hold their own `Arc` back to the pieces they need.
pub struct Engine {
    pub bus: Arc<Bus>,
    pub shared_vars: Arc<SharedVarsStore>,
    pub shared_objects: Arc<SharedObjectRegistry>,
    pub scripts: Arc<ScriptManager>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Bus::new()),
            shared_vars: Arc::new(SharedVarsStore::new()),
            shared_objects: Arc::new(SharedObjectRegistry::default()),
            scripts: Arc::new(ScriptManager::new()),
        }
    }

    /// Loads one configuration file with the given loader options,
    /// treating every referenced plugin as not-yet-loaded (a fresh engine
    /// has none installed).
    pub fn load_config(&self, path: impl AsRef<Path>, options: LoaderOptions) -> EngineResult<ConfigFile> {
        let mut loader = Loader::with_options(|_plugin: &str| false, options);
        Ok(loader.load(path)?)
    }

    /// Mark-and-sweep reload, step 1: marks every non-static script and
    /// every non-static bus handle not in use. The caller re-runs its
    /// `initScript`/handler-install pass, then calls [`Engine::sweep`].
    pub fn begin_reload(&self) {
        self.scripts.mark_non_static_not_in_use();
        self.bus.mark_all_not_in_use();
    }

    /// Mark-and-sweep reload, step 3: removes everything still unmarked.
    pub fn sweep(&self) {
        self.scripts.sweep();
        self.bus.sweep();
    }

    /// Ordered shutdown: stop accepting further dispatches, detach every
    /// handler and post-hook, drop every running context, clear shared
    /// object state.
    pub fn shutdown(&self) {
        self.bus.shutdown();
        self.scripts.shutdown();
        self.shared_objects.clear_all(false, None);
    }
}
