use crate::filter::Filter;
use crate::message::Message;
use pbx_core::prelude::{CoreResult, Operation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a handle creates the runner that executes its callback. The three
/// variants differ only in *where the compiled code and context come
/// from*; once a runner exists, invocation is identical.
pub enum HandleVariant {
    /// Installed from a running script; reuses the installer's own
    /// context and compiled code.
    Regular,
    /// Loaded from a dedicated configuration file; a fresh runner is
    /// created inside a freshly parsed script on every delivery.
    GlobalSingleton,
    /// Installed at runtime but bound to a live caller's context for
    /// symbol lookups; still re-parsed and re-run fresh on every delivery.
    ScriptSingleton,
}

/// Creates and drives the runner for one delivery. The concrete script
/// language and compiled-code representation are out of this crate's
/// scope; a host wires a real implementation in here.
pub trait HandlerTarget: Send + Sync {
    fn invoke(&self, message: &Message, handled: Option<bool>) -> CoreResult<Operation>;
}

/// Joins a global handler's identity fields with a separator that cannot
/// appear in any individual field (file paths, callback names, context
/// and script-name identifiers never contain NUL), for the
/// dedup-on-reload rule: identical descriptors map to the same installed
/// handle instead of installing a duplicate.
pub fn canonical_descriptor(
    file: &str,
    callback: &str,
    priority: i32,
    filter_desc: &str,
    context_id: &str,
    script_name: &str,
    tracking: &str,
) -> String {
    format!("{file}\0{callback}\0{priority}\0{filter_desc}\0{context_id}\0{script_name}\0{tracking}")
}

/// A handler (pre-dispatch) or post-hook (post-dispatch) installed on the
/// bus, with its priority and optional filter.
pub struct Handle {
    pub name: String,
    pub priority: i32,
    pub filter: Option<Filter>,
    pub post_hook: bool,
    pub variant: HandleVariant,
    /// Canonical identity descriptor for global handlers (`§9`'s
    /// dedup-on-reload rule); `None` for regular, per-script handles,
    /// which are never deduplicated this way.
    descriptor: Option<String>,
    target: Arc<dyn HandlerTarget>,
    in_use: AtomicBool,
}

impl Handle {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        filter: Option<Filter>,
        post_hook: bool,
        variant: HandleVariant,
        target: Arc<dyn HandlerTarget>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            priority,
            filter,
            post_hook,
            variant,
            descriptor: None,
            target,
            in_use: AtomicBool::new(true),
        })
    }

    /// Builds a global-singleton or script-singleton handle carrying a
    /// canonical identity descriptor, so a later reinstall with the same
    /// descriptor reuses this handle instead of duplicating it.
    pub fn with_descriptor(
        name: impl Into<String>,
        priority: i32,
        filter: Option<Filter>,
        post_hook: bool,
        variant: HandleVariant,
        target: Arc<dyn HandlerTarget>,
        descriptor: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            priority,
            filter,
            post_hook,
            variant,
            descriptor: Some(descriptor),
            target,
            in_use: AtomicBool::new(true),
        })
    }

    /// A stable hash of this handle's identity descriptor, or `None` for
    /// handles installed without one (regular per-script handles).
    pub fn descriptor_id(&self) -> Option<u64> {
        self.descriptor.as_ref().map(|d| xxhash_rust::xxh64::xxh64(d.as_bytes(), 0))
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.filter.as_ref().map(|f| f.matches(message)).unwrap_or(true)
    }

    pub fn mark_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::Release);
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Invokes the handler, defaulting the handled result to `false` if
    /// the runner fails to produce one.
    pub fn invoke_handler(&self, message: &Message) -> bool {
        self.target
            .invoke(message, None)
            .ok()
            .and_then(|op| op.as_bool())
            .unwrap_or(false)
    }

    /// Invokes the post-hook; its return value is ignored by the bus.
    pub fn invoke_post_hook(&self, message: &Message, handled: bool) {
        let _ = self.target.invoke(message, Some(handled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_core::prelude::CoreError;

    struct FixedTarget(bool);
    impl HandlerTarget for FixedTarget {
        fn invoke(&self, _message: &Message, _handled: Option<bool>) -> CoreResult<Operation> {
            Ok(Operation::boolean(self.0))
        }
    }

    struct FailingTarget;
    impl HandlerTarget for FailingTarget {
        fn invoke(&self, _message: &Message, _handled: Option<bool>) -> CoreResult<Operation> {
            Err(CoreError::RunnerCreation("boom".into()))
        }
    }

    #[test]
    fn invoke_handler_defaults_to_false_when_runner_fails() {
        let h = Handle::new("h", 100, None, false, HandleVariant::Regular, Arc::new(FailingTarget));
        let m = Message::new("test", false, 0);
        assert!(!h.invoke_handler(&m));
    }

    #[test]
    fn invoke_handler_propagates_true_result() {
        let h = Handle::new("h", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true)));
        let m = Message::new("test", false, 0);
        assert!(h.invoke_handler(&m));
    }

    #[test]
    fn mark_sweep_flags_round_trip() {
        let h = Handle::new("h", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true)));
        assert!(h.is_in_use());
        h.mark_in_use(false);
        assert!(!h.is_in_use());
    }

    #[test]
    fn regular_handles_have_no_descriptor_id() {
        let h = Handle::new("h", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true)));
        assert_eq!(h.descriptor_id(), None);
    }

    #[test]
    fn identical_descriptors_hash_equal_and_differing_ones_do_not() {
        let d1 = canonical_descriptor("route.js", "onRoute", 100, "all()", "ctx-1", "routing", "track-a");
        let d2 = canonical_descriptor("route.js", "onRoute", 100, "all()", "ctx-1", "routing", "track-a");
        let d3 = canonical_descriptor("route.js", "onRoute", 50, "all()", "ctx-1", "routing", "track-a");

        let h1 = Handle::with_descriptor(
            "h1",
            100,
            None,
            false,
            HandleVariant::GlobalSingleton,
            Arc::new(FixedTarget(true)),
            d1,
        );
        let h2 = Handle::with_descriptor(
            "h2",
            100,
            None,
            false,
            HandleVariant::GlobalSingleton,
            Arc::new(FixedTarget(true)),
            d2,
        );
        let h3 = Handle::with_descriptor(
            "h3",
            50,
            None,
            false,
            HandleVariant::GlobalSingleton,
            Arc::new(FixedTarget(true)),
            d3,
        );

        assert_eq!(h1.descriptor_id(), h2.descriptor_id());
        assert_ne!(h1.descriptor_id(), h3.descriptor_id());
    }
}
