use crate::error::{RuntimeError, RuntimeResult};
use crate::event_worker::{EventKind, EventWorker};
use pbx_core::prelude::{CompiledCode, Context};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Static,
    Dynamic,
}

/// Parses a script file into compiled code. The concrete language parser
/// is an external collaborator; the manager only needs to know a file
/// maps to some `CompiledCode`.
pub trait ScriptLoader: Send + Sync {
    fn parse(&self, file: &str) -> RuntimeResult<Arc<dyn CompiledCode>>;
}

/// One addressable catalog slot: exactly one running instance. A script
/// installed with `instances <= 1` has a single slot keyed by its bare
/// name; `instances > 1` spawns one slot per index, keyed `"<name>/<i>"`.
struct CatalogEntry {
    base_name: String,
    file: String,
    script_type: ScriptType,
    rel_path: Option<String>,
    instance_count: u32,
    instance_index: u32,
    code: Option<Arc<dyn CompiledCode>>,
    context: Arc<Context>,
    in_use: bool,
    event_worker: EventWorker,
}

/// Catalog of every loaded script, keyed by name. A multi-instance entry
/// spawns names `"<name>/0" .. "<name>/(N-1)"`, each independently
/// addressable (for reload, allocation reporting, etc); `"<name>/0"` is
/// the implicit zero-th instance.
#[derive(Default)]
pub struct ScriptManager {
    catalog: Mutex<FxHashMap<String, CatalogEntry>>,
}

impl ScriptManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_name(base: &str, index: u32) -> String {
        format!("{base}/{index}")
    }

    fn catalog_keys(name: &str, count: u32) -> Vec<String> {
        if count <= 1 {
            vec![name.to_string()]
        } else {
            (0..count).map(|i| Self::instance_name(name, i)).collect()
        }
    }

    /// Singleton handlers may only be installed from instance 0 or 1, to
    /// suppress duplicate identical handlers across copies.
    pub fn may_install_singleton(instance_index: u32) -> bool {
        instance_index < 2
    }

    /// `initScript`: reuses the existing entries (scheduling a re-init on
    /// each) if the file hasn't changed and the instance count is
    /// unchanged; otherwise parses fresh code and reruns `main` on every
    /// instance, replacing the whole family of per-instance entries.
    pub fn init_script(
        &self,
        name: &str,
        file: &str,
        script_type: ScriptType,
        rel_path: Option<String>,
        instances: u32,
        loader: &dyn ScriptLoader,
        keep_old_on_fail: bool,
    ) -> RuntimeResult<()> {
        let count = instances.max(1);
        let mut catalog = self.catalog.lock().unwrap();

        let existing: Vec<String> =
            catalog.iter().filter(|(_, e)| e.base_name == name).map(|(k, _)| k.clone()).collect();
        let existing_matches = !existing.is_empty()
            && existing.iter().all(|k| {
                let e = catalog.get(k).unwrap();
                e.file == file && e.instance_count == count
            });

        if existing_matches {
            for key in &existing {
                let entry = catalog.get_mut(key).unwrap();
                entry.in_use = true;
                entry.event_worker.install_non_time(EventKind::ReInit, "reinit", vec![], false);
            }
            return Ok(());
        }

        let parsed = loader.parse(file);
        let code = match parsed {
            Ok(code) => code,
            Err(e) if keep_old_on_fail && !existing.is_empty() => {
                tracing::warn!(name, error = %e, "keeping previous script after parse failure");
                for key in &existing {
                    catalog.get_mut(key).unwrap().in_use = true;
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for key in &existing {
            catalog.remove(key);
        }

        for (index, key) in Self::catalog_keys(name, count).into_iter().enumerate() {
            let index = index as u32;
            let context = Arc::new(Context::new(index, count, false));
            code.init_context(&context).map_err(|e| RuntimeError::ExecutionFailed(e.to_string()))?;
            let mut runner = code.clone().create_runner(context.clone());
            runner.execute().map_err(|e| RuntimeError::ExecutionFailed(e.to_string()))?;

            let event_worker = EventWorker::new();
            event_worker.install_non_time(EventKind::ReInit, "reinit", vec![], false);

            catalog.insert(
                key,
                CatalogEntry {
                    base_name: name.to_string(),
                    file: file.to_string(),
                    script_type,
                    rel_path: rel_path.clone(),
                    instance_count: count,
                    instance_index: index,
                    code: Some(code.clone()),
                    context,
                    in_use: true,
                    event_worker,
                },
            );
        }
        Ok(())
    }

    /// Step 1 of mark-and-sweep: marks every non-static script not in use.
    pub fn mark_non_static_not_in_use(&self) {
        for entry in self.catalog.lock().unwrap().values_mut() {
            if entry.script_type != ScriptType::Static {
                entry.in_use = false;
            }
        }
    }

    /// Step 3 of mark-and-sweep: removes every entry still not in use.
    pub fn sweep(&self) {
        self.catalog.lock().unwrap().retain(|_, e| e.script_type == ScriptType::Static || e.in_use);
    }

    /// `reloadDynamic()`: rebuilds every `Dynamic` script family from its
    /// current file path.
    pub fn reload_dynamic(&self, loader: &dyn ScriptLoader) -> RuntimeResult<()> {
        let bases: Vec<(String, String, Option<String>, u32)> = {
            let catalog = self.catalog.lock().unwrap();
            let mut seen: FxHashMap<String, (String, Option<String>, u32)> = FxHashMap::default();
            for e in catalog.values().filter(|e| e.script_type == ScriptType::Dynamic) {
                seen.entry(e.base_name.clone()).or_insert_with(|| {
                    (e.file.clone(), e.rel_path.clone(), e.instance_count)
                });
            }
            seen.into_iter().map(|(name, (file, rel_path, count))| (name, file, rel_path, count)).collect()
        };

        for (name, file, rel_path, instances) in bases {
            {
                let mut catalog = self.catalog.lock().unwrap();
                catalog.retain(|_, e| e.base_name != name);
            }
            self.init_script(&name, &file, ScriptType::Dynamic, rel_path, instances, loader, false)?;
        }
        Ok(())
    }

    /// True if `name` addresses a catalog slot directly, or is the base
    /// name of a multi-instance family.
    pub fn contains(&self, name: &str) -> bool {
        let catalog = self.catalog.lock().unwrap();
        catalog.contains_key(name) || catalog.values().any(|e| e.base_name == name)
    }

    pub fn is_in_use(&self, name: &str) -> Option<bool> {
        let catalog = self.catalog.lock().unwrap();
        if let Some(e) = catalog.get(name) {
            return Some(e.in_use);
        }
        let mut found = false;
        let mut any_in_use = false;
        for e in catalog.values().filter(|e| e.base_name == name) {
            found = true;
            any_in_use |= e.in_use;
        }
        found.then_some(any_in_use)
    }

    /// One line per catalog entry, for the `info` console command:
    /// `(key, file, script_type, instance count in its family, in_use)`.
    pub fn catalog_summary(&self) -> Vec<(String, String, ScriptType, u32, bool)> {
        self.catalog
            .lock()
            .unwrap()
            .iter()
            .map(|(key, e)| (key.clone(), e.file.clone(), e.script_type, e.instance_count, e.in_use))
            .collect()
    }

    /// Live/total object counts for `name`'s running instance(s), for the
    /// `allocations instance`/`allocations total` console commands. `name`
    /// may be an exact catalog key (one instance) or a family base name
    /// (every instance, ordered by index). Contexts created without
    /// `track_allocations` contribute `(0, 0)`.
    pub fn allocation_counts(&self, name: &str) -> Vec<(u32, usize, usize)> {
        let catalog = self.catalog.lock().unwrap();

        let counts_for = |e: &CatalogEntry| -> (u32, usize, usize) {
            let (live, total) =
                e.context.allocations().map(|tracker| (tracker.live(), tracker.total())).unwrap_or((0, 0));
            (e.instance_index, live, total)
        };

        if let Some(e) = catalog.get(name) {
            return vec![counts_for(e)];
        }

        let mut rows: Vec<(u32, usize, usize)> =
            catalog.values().filter(|e| e.base_name == name).map(counts_for).collect();
        rows.sort_by_key(|(index, _, _)| *index);
        rows
    }

    /// Ordered shutdown: the caller is expected to have already stopped
    /// the bus and dropped shared-object state; this just drops every
    /// running context and its event worker.
    pub fn shutdown(&self) {
        let mut catalog = self.catalog.lock().unwrap();
        for entry in catalog.values() {
            entry.event_worker.stop();
        }
        catalog.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_core::prelude::{CoreResult, ExecutionBackend, Operation, Runner, RunnerState, SourceLocation};

    struct StubCode;
    impl CompiledCode for StubCode {
        fn file_path(&self) -> &str {
            "stub.js"
        }
        fn init_context(&self, _context: &Context) -> CoreResult<()> {
            Ok(())
        }
        fn create_runner(self: Arc<Self>, context: Arc<Context>) -> Runner {
            Runner::new(self.clone(), context, Box::new(Immediate))
        }
        fn source_location(&self, line_index: u32) -> Option<SourceLocation> {
            Some(SourceLocation { file: "stub.js".into(), line: line_index })
        }
    }
    struct Immediate;
    impl ExecutionBackend for Immediate {
        fn step(&mut self, _stack: &mut Vec<Operation>) -> CoreResult<RunnerState> {
            Ok(RunnerState::Succeeded)
        }
    }

    struct StubLoader;
    impl ScriptLoader for StubLoader {
        fn parse(&self, _file: &str) -> RuntimeResult<Arc<dyn CompiledCode>> {
            Ok(Arc::new(StubCode))
        }
    }

    struct FailingLoader;
    impl ScriptLoader for FailingLoader {
        fn parse(&self, file: &str) -> RuntimeResult<Arc<dyn CompiledCode>> {
            Err(RuntimeError::ParseFailed { file: file.to_string(), reason: "bad syntax".into() })
        }
    }

    #[test]
    fn init_script_parses_and_runs_main_on_every_instance() {
        let manager = ScriptManager::new();
        manager
            .init_script("routing", "routing.js", ScriptType::Static, None, 1, &StubLoader, false)
            .unwrap();
        assert!(manager.contains("routing"));
        assert_eq!(manager.is_in_use("routing"), Some(true));
    }

    #[test]
    fn reinit_without_file_or_instance_change_keeps_the_entry() {
        let manager = ScriptManager::new();
        manager.init_script("r", "r.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        manager.mark_non_static_not_in_use();
        manager.init_script("r", "r.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        assert_eq!(manager.is_in_use("r"), Some(true));
    }

    #[test]
    fn keep_old_on_fail_preserves_the_previous_entry() {
        let manager = ScriptManager::new();
        manager.init_script("r", "r.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        let result = manager.init_script("r", "r2.js", ScriptType::Static, None, 1, &FailingLoader, true);
        assert!(result.is_ok());
        assert!(manager.contains("r"));
    }

    #[test]
    fn parse_failure_without_keep_old_propagates() {
        let manager = ScriptManager::new();
        let result = manager.init_script("r", "r.js", ScriptType::Static, None, 1, &FailingLoader, false);
        assert!(result.is_err());
    }

    #[test]
    fn instance_naming_and_singleton_restriction() {
        assert_eq!(ScriptManager::instance_name("routing", 2), "routing/2");
        assert!(ScriptManager::may_install_singleton(0));
        assert!(ScriptManager::may_install_singleton(1));
        assert!(!ScriptManager::may_install_singleton(2));
    }

    #[test]
    fn mark_and_sweep_removes_scripts_not_reinstalled() {
        let manager = ScriptManager::new();
        manager.init_script("a", "a.js", ScriptType::Dynamic, None, 1, &StubLoader, false).unwrap();
        manager.init_script("s", "s.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        manager.mark_non_static_not_in_use();
        manager.sweep();
        assert!(!manager.contains("a"));
        assert!(manager.contains("s"));
    }

    #[test]
    fn reload_dynamic_only_touches_dynamic_entries() {
        let manager = ScriptManager::new();
        manager.init_script("a", "a.js", ScriptType::Dynamic, None, 1, &StubLoader, false).unwrap();
        manager.init_script("s", "s.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        manager.reload_dynamic(&StubLoader).unwrap();
        assert!(manager.contains("a"));
        assert!(manager.contains("s"));
    }

    #[test]
    fn multi_instance_scripts_are_keyed_per_instance_and_individually_addressable() {
        let manager = ScriptManager::new();
        manager.init_script("routing", "routing.js", ScriptType::Static, None, 2, &StubLoader, false).unwrap();

        let mut summary = manager.catalog_summary();
        summary.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].0, "routing/0");
        assert_eq!(summary[1].0, "routing/1");
        assert!(summary.iter().all(|(_, file, ty, count, in_use)| {
            file == "routing.js" && *ty == ScriptType::Static && *count == 2 && *in_use
        }));

        assert!(manager.contains("routing"));
        assert!(manager.contains("routing/0"));
        assert_eq!(manager.is_in_use("routing/1"), Some(true));

        let counts = manager.allocation_counts("routing");
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0], (0, 0, 0));
        assert_eq!(counts[1].0, 1);

        let single = manager.allocation_counts("routing/1");
        assert_eq!(single, vec![(1, 0, 0)]);
    }

    #[test]
    fn shutdown_clears_the_catalog() {
        let manager = ScriptManager::new();
        manager.init_script("a", "a.js", ScriptType::Static, None, 1, &StubLoader, false).unwrap();
        manager.shutdown();
        assert!(!manager.contains("a"));
    }
}
