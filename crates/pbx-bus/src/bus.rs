use crate::handle::Handle;
use crate::message::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Central handler/post-hook registry and dispatcher.
///
/// Handlers run pre-dispatch in ascending priority order; the first to
/// set the message handled wins (later, lower-priority handlers still
/// run, matching the engine's "all handlers see the message" contract,
/// but only the first `true` result is kept as the final outcome).
/// Post-hooks always run after, regardless of the handled outcome.
#[derive(Default)]
pub struct Bus {
    handlers: Mutex<Vec<Arc<Handle>>>,
    post_hooks: Mutex<Vec<Arc<Handle>>>,
    engine_stop: AtomicBool,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle`. If it carries an identity descriptor (global
    /// handlers, per `§9` "Handler identity") that matches an already
    /// installed handle, that existing handle is just marked in-use again
    /// rather than installing a duplicate — this is what makes
    /// mark-and-sweep reload idempotent for unchanged configuration
    /// entries instead of uninstalling and reinstalling them.
    pub fn install_handler(&self, handle: Arc<Handle>) {
        let mut guard = self.handlers.lock().unwrap();
        if let Some(id) = handle.descriptor_id() {
            if let Some(existing) = guard.iter().find(|h| h.descriptor_id() == Some(id)) {
                existing.mark_in_use(true);
                return;
            }
        }
        guard.push(handle);
        guard.sort_by_key(|h| h.priority);
    }

    /// Same dedup-on-reload rule as [`install_handler`], applied to
    /// post-hooks.
    pub fn install_post_hook(&self, handle: Arc<Handle>) {
        let mut guard = self.post_hooks.lock().unwrap();
        if let Some(id) = handle.descriptor_id() {
            if let Some(existing) = guard.iter().find(|h| h.descriptor_id() == Some(id)) {
                existing.mark_in_use(true);
                return;
            }
        }
        guard.push(handle);
        guard.sort_by_key(|h| h.priority);
    }

    pub fn uninstall(&self, name: &str) {
        self.handlers.lock().unwrap().retain(|h| h.name != name);
        self.post_hooks.lock().unwrap().retain(|h| h.name != name);
    }

    /// Runs every matching handler in priority order, then every matching
    /// post-hook with the final handled outcome. On shutdown, every
    /// delivery is short-circuited to unhandled without invoking anyone.
    pub fn dispatch(&self, message: &Message) -> bool {
        if self.engine_stop.load(Ordering::Acquire) {
            return false;
        }

        let mut handled = false;
        for handle in self.handlers.lock().unwrap().iter() {
            if !handle.matches(message) {
                continue;
            }
            if handle.invoke_handler(message) {
                handled = true;
            }
        }
        message.set_handled(handled);

        for handle in self.post_hooks.lock().unwrap().iter() {
            if handle.matches(message) {
                handle.invoke_post_hook(message, handled);
            }
        }
        handled
    }

    /// Step 1 of mark-and-sweep reload: mark every handler and post-hook
    /// not in use.
    pub fn mark_all_not_in_use(&self) {
        for h in self.handlers.lock().unwrap().iter() {
            h.mark_in_use(false);
        }
        for h in self.post_hooks.lock().unwrap().iter() {
            h.mark_in_use(false);
        }
    }

    /// Step 3 of mark-and-sweep reload: drop every handle still marked
    /// not in use.
    pub fn sweep(&self) {
        self.handlers.lock().unwrap().retain(|h| h.is_in_use());
        self.post_hooks.lock().unwrap().retain(|h| h.is_in_use());
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn post_hook_count(&self) -> usize {
        self.post_hooks.lock().unwrap().len()
    }

    /// Orders shutdown: stop accepting deliveries, then detach everyone.
    pub fn shutdown(&self) {
        self.engine_stop.store(true, Ordering::Release);
        self.handlers.lock().unwrap().clear();
        self.post_hooks.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleVariant;
    use pbx_core::prelude::{CoreResult, Operation};

    struct FixedTarget(bool);
    impl crate::handle::HandlerTarget for FixedTarget {
        fn invoke(&self, _message: &Message, _handled: Option<bool>) -> CoreResult<Operation> {
            Ok(Operation::boolean(self.0))
        }
    }

    #[test]
    fn handlers_run_in_priority_order_and_first_true_sticks() {
        let bus = Bus::new();
        bus.install_handler(Handle::new("low", 200, None, false, HandleVariant::Regular, Arc::new(FixedTarget(false))));
        bus.install_handler(Handle::new("high", 50, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true))));
        let msg = Message::new("call.route", false, 0);
        assert!(bus.dispatch(&msg));
        assert!(msg.handled());
    }

    #[test]
    fn post_hooks_run_regardless_of_handled_outcome() {
        let bus = Bus::new();
        bus.install_post_hook(Handle::new("ph", 100, None, true, HandleVariant::Regular, Arc::new(FixedTarget(false))));
        let msg = Message::new("call.route", false, 0);
        assert!(!bus.dispatch(&msg));
        assert_eq!(bus.post_hook_count(), 1);
    }

    #[test]
    fn mark_and_sweep_removes_only_unmarked_handles() {
        let bus = Bus::new();
        bus.install_handler(Handle::new("a", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true))));
        bus.install_handler(Handle::new("b", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true))));
        bus.mark_all_not_in_use();
        // "a" re-registers (as the real loader would on a successful reinstall).
        bus.handlers.lock().unwrap().iter().find(|h| h.name == "a").unwrap().mark_in_use(true);
        bus.sweep();
        assert_eq!(bus.handler_count(), 1);
    }

    #[test]
    fn reinstalling_a_handle_with_the_same_descriptor_reuses_it() {
        use crate::handle::canonical_descriptor;

        let bus = Bus::new();
        let descriptor = canonical_descriptor("route.js", "onRoute", 100, "all()", "ctx-1", "routing", "");
        let first = Handle::with_descriptor(
            "h",
            100,
            None,
            false,
            HandleVariant::GlobalSingleton,
            Arc::new(FixedTarget(true)),
            descriptor.clone(),
        );
        bus.install_handler(first.clone());
        first.mark_in_use(false);

        let second = Handle::with_descriptor(
            "h",
            100,
            None,
            false,
            HandleVariant::GlobalSingleton,
            Arc::new(FixedTarget(true)),
            descriptor,
        );
        bus.install_handler(second);

        assert_eq!(bus.handler_count(), 1);
        assert!(first.is_in_use());
    }

    #[test]
    fn shutdown_short_circuits_every_future_dispatch() {
        let bus = Bus::new();
        bus.install_handler(Handle::new("a", 100, None, false, HandleVariant::Regular, Arc::new(FixedTarget(true))));
        bus.shutdown();
        let msg = Message::new("call.route", false, 0);
        assert!(!bus.dispatch(&msg));
        assert_eq!(bus.handler_count(), 0);
    }
}
