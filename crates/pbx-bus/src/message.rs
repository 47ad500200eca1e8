use crate::bus::Bus;
use crate::error::{BusError, BusResult};
use crate::handle::HandlerTarget;
use crate::table::Table;
use pbx_core::prelude::{extract_args, CoreError, CoreResult, Context, NativeObject, Operation};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Whether a dispatched-callback bundle should fire for this delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledFilter {
    Any,
    OnlyHandled,
    OnlyUnhandled,
}

impl HandledFilter {
    pub fn matches(self, handled: bool, broadcast: bool) -> bool {
        if broadcast {
            return true;
        }
        match self {
            HandledFilter::Any => true,
            HandledFilter::OnlyHandled => handled,
            HandledFilter::OnlyUnhandled => !handled,
        }
    }
}

/// A bundle installed via `enqueue`'s dispatched-callback argument: what to
/// call, with what captured arguments, once the engine reports the
/// message's final handled/unhandled state.
pub struct DispatchedCallback {
    pub function_name: String,
    pub captured_args: Vec<Operation>,
    pub handled_filter: HandledFilter,
}

/// A bus message: an ordered parameter list, an optional 2-D result table,
/// and the trace bookkeeping `trace()` accumulates.
///
/// Ownership invariants (`§4.6`): a binding starts `owned` and attached.
/// `enqueue` hands it to the bus and detaches it, optionally freezing it
/// first; once detached, every mutating native fails with
/// [`BusError::Detached`], mirroring a script-side binding whose
/// underlying message pointer has gone away.
pub struct Message {
    name: String,
    broadcast: bool,
    msg_time_ms: u64,
    params: Mutex<Vec<(String, String)>>,
    ret_value: Mutex<String>,
    user_data: Mutex<Option<Table>>,
    trace_id: Mutex<Option<String>>,
    handled: AtomicBool,
    created_at_ms: AtomicU64,
    owned: AtomicBool,
    detached: AtomicBool,
    frozen: AtomicBool,
}

impl Message {
    pub fn new(name: impl Into<String>, broadcast: bool, now_ms: u64) -> Self {
        Self {
            name: name.into(),
            broadcast,
            msg_time_ms: now_ms,
            params: Mutex::new(Vec::new()),
            ret_value: Mutex::new(String::new()),
            user_data: Mutex::new(None),
            trace_id: Mutex::new(None),
            handled: AtomicBool::new(false),
            created_at_ms: AtomicU64::new(now_ms),
            owned: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
        }
    }

    /// Shallow-copies `source`'s params, skipping names starting with `__`,
    /// the way the `Message(name, broadcast?, params?)` constructor does.
    pub fn with_params(mut self, source: &[(String, String)]) -> Self {
        let mut params = self.params.into_inner().unwrap();
        for (k, v) in source {
            if !k.starts_with("__") {
                params.push((k.clone(), v.clone()));
            }
        }
        self.params = Mutex::new(params);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn msg_time(&self) -> u64 {
        self.msg_time_ms
    }

    pub fn msg_age(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms.load(Ordering::Relaxed))
    }

    pub fn handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    pub fn set_handled(&self, handled: bool) {
        self.handled.store(handled, Ordering::Release);
    }

    pub fn ret_value(&self) -> String {
        self.ret_value.lock().unwrap().clone()
    }

    pub fn set_ret_value(&self, value: impl Into<String>) {
        *self.ret_value.lock().unwrap() = value.into();
    }

    pub fn get_param(&self, name: &str) -> Option<String> {
        self.params.lock().unwrap().iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    pub fn set_param(&self, name: impl Into<String>, value: impl Into<String>) {
        self.params.lock().unwrap().push((name.into(), value.into()));
    }

    pub fn clear_param(&self, name: &str) {
        self.params.lock().unwrap().retain(|(k, _)| k != name);
    }

    /// Copies every param whose name is in `names` (or all of them, if
    /// `names` is empty) from `other` into this message.
    pub fn copy_params(&self, other: &Message, names: &[String]) {
        let source = other.params.lock().unwrap().clone();
        let mut dest = self.params.lock().unwrap();
        for (k, v) in source {
            if names.is_empty() || names.contains(&k) {
                dest.push((k, v));
            }
        }
    }

    pub fn set_user_data(&self, table: Table) {
        *self.user_data.lock().unwrap() = Some(table);
    }

    pub fn with_table<R>(&self, f: impl FnOnce(Option<&Table>) -> R) -> R {
        f(self.user_data.lock().unwrap().as_ref())
    }

    pub fn trace_id(&self) -> Option<String> {
        self.trace_id.lock().unwrap().clone()
    }

    pub fn set_trace_id(&self, id: impl Into<String>) {
        *self.trace_id.lock().unwrap() = Some(id.into());
    }

    /// `trace(return, level?, ...text)`: emits a structured log record
    /// under the message's trace id, appends it onto the message itself as
    /// a `trace_msg_<N>` param and bumps the `trace_msg_count` param (so
    /// script code can read its own trace history back via `getParam`),
    /// and passes `return_value` through unchanged unless it is
    /// `undefined`, in which case `undefined` is returned.
    pub fn trace(&self, return_value: Operation, level: &str, text: &[&str]) -> Operation {
        let joined = text.join(" ");
        tracing::debug!(trace_id = ?self.trace_id(), level, message = %joined, "message trace");

        let count = self.trace_msg_count();
        self.set_param(format!("trace_msg_{count}"), format!("[{level}] {joined}"));
        self.set_param("trace_msg_count", (count + 1).to_string());

        if return_value.is_undefined() {
            Operation::undefined()
        } else {
            return_value
        }
    }

    pub fn trace_msg_count(&self) -> usize {
        self.get_param("trace_msg_count").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn trace_msg(&self, index: usize) -> Option<String> {
        self.get_param(&format!("trace_msg_{index}"))
    }

    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    /// Marks this binding as not owning its message — used when a message
    /// is handed to a callback (e.g. a handler's `message` argument)
    /// rather than constructed fresh; a non-owning binding may not
    /// `enqueue`.
    pub fn mark_borrowed(&self) {
        self.owned.store(false, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    fn guard_mutation(&self) -> BusResult<()> {
        if self.detached.load(Ordering::Acquire) {
            return Err(BusError::Detached);
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(BusError::Frozen);
        }
        Ok(())
    }

    /// Native-bridge-checked `setParam`: rejected once detached or frozen,
    /// unlike the host-side [`Message::set_param`] which always succeeds.
    pub fn try_set_param(&self, name: impl Into<String>, value: impl Into<String>) -> BusResult<()> {
        self.guard_mutation()?;
        self.set_param(name, value);
        Ok(())
    }

    pub fn try_clear_param(&self, name: &str) -> BusResult<()> {
        self.guard_mutation()?;
        self.clear_param(name);
        Ok(())
    }

    pub fn try_set_ret_value(&self, value: impl Into<String>) -> BusResult<()> {
        self.guard_mutation()?;
        self.set_ret_value(value);
        Ok(())
    }

    /// `Message.enqueue(bus, callback?, freeze_after_transfer=false)`: only
    /// an owned, attached binding may transfer ownership to the bus. On
    /// success, dispatches through `bus`, detaches (freezing first if
    /// asked), then — if `callback` is given and its `handled_filter`
    /// matches the outcome (always, for a broadcast message) — invokes
    /// `invoker` with the final handled flag.
    pub fn enqueue(
        &self,
        bus: &Bus,
        callback: Option<(&DispatchedCallback, &dyn HandlerTarget)>,
        freeze_after_transfer: bool,
    ) -> BusResult<bool> {
        if self.detached.load(Ordering::Acquire) {
            return Err(BusError::Detached);
        }
        if !self.owned.load(Ordering::Acquire) {
            return Err(BusError::Frozen);
        }
        if freeze_after_transfer {
            self.frozen.store(true, Ordering::Release);
        }

        let handled = bus.dispatch(self);
        self.detached.store(true, Ordering::Release);

        if let Some((bundle, invoker)) = callback {
            if bundle.handled_filter.matches(handled, self.broadcast) {
                let _ = invoker.invoke(self, Some(handled));
            }
        }
        Ok(handled)
    }

    /// `Message.dispatch(async?)`: dispatches synchronously through `bus`
    /// without transferring ownership or detaching. This build has no
    /// worker-thread async path, so the `async` argument is accepted by
    /// the native dispatch table but always resolves synchronously.
    /// Detached bindings return `false`.
    pub fn dispatch(&self, bus: &Bus) -> bool {
        if self.detached.load(Ordering::Acquire) {
            return false;
        }
        bus.dispatch(self)
    }
}

fn map_bus_error(e: BusError) -> CoreError {
    match e {
        BusError::Detached => CoreError::Detached,
        BusError::Frozen => CoreError::FrozenAssign,
        BusError::FilterMismatch | BusError::NotInstalled(_) => {
            CoreError::UnknownNative("n/a".to_string())
        }
    }
}

/// Native bridge surface for scripts (`§4.6`): `name`, `broadcast`,
/// `getRetValue`/`setRetValue`, `msgTime`/`msgAge`, `getParam`/`setParam`/
/// `clearParam`, and `trace`. `enqueue`/`dispatch` are not reachable
/// through this dispatch-by-name surface because `call_native` has no way
/// to reach a `Bus` — a host wires those through the inherent
/// [`Message::enqueue`]/[`Message::dispatch`] methods directly instead.
impl NativeObject for Message {
    fn call_native(&self, method: &str, args: Vec<Operation>, _context: &Context) -> CoreResult<Operation> {
        match method {
            "name" => Ok(Operation::string(self.name().to_string())),
            "broadcast" => Ok(Operation::boolean(self.broadcast())),
            "msgTime" => Ok(Operation::integer(self.msg_time() as i64)),
            "msgAge" => Ok(Operation::integer(self.msg_age(self.msg_time()) as i64)),
            "getRetValue" => Ok(Operation::string(self.ret_value())),
            "setRetValue" => {
                let args = extract_args(1, 1, args)?;
                self.try_set_ret_value(args[0].as_str().unwrap_or_default()).map_err(map_bus_error)?;
                Ok(Operation::undefined())
            }
            "getParam" => {
                let args = extract_args(1, 1, args)?;
                let name = args[0].as_str().unwrap_or_default();
                Ok(self.get_param(name).map(Operation::string).unwrap_or_else(Operation::null))
            }
            "setParam" => {
                let args = extract_args(2, 2, args)?;
                let name = args[0].as_str().unwrap_or_default().to_string();
                let value = args[1].as_str().unwrap_or_default().to_string();
                self.try_set_param(name, value).map_err(map_bus_error)?;
                Ok(Operation::undefined())
            }
            "clearParam" => {
                let args = extract_args(1, 1, args)?;
                let name = args[0].as_str().unwrap_or_default();
                self.try_clear_param(name).map_err(map_bus_error)?;
                Ok(Operation::undefined())
            }
            "trace" => {
                let args = extract_args(1, 0, args)?;
                let mut iter = args.into_iter();
                let return_value = iter.next().unwrap_or_else(Operation::undefined);
                let rest: Vec<Operation> = iter.collect();
                let level = rest.first().and_then(|o| o.as_str()).unwrap_or("info").to_string();
                let text: Vec<&str> = rest.iter().skip(1).filter_map(|o| o.as_str()).collect();
                Ok(self.trace(return_value, &level, &text))
            }
            other => Err(CoreError::UnknownNative(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, HandleVariant};
    use std::sync::Arc;

    #[test]
    fn constructor_skips_dunder_prefixed_params() {
        let source = vec![("a".to_string(), "1".to_string()), ("__hidden".to_string(), "x".to_string())];
        let msg = Message::new("test", false, 0).with_params(&source);
        assert_eq!(msg.get_param("a"), Some("1".to_string()));
        assert_eq!(msg.get_param("__hidden"), None);
    }

    #[test]
    fn set_param_overrides_read_but_keeps_history() {
        let msg = Message::new("test", false, 0);
        msg.set_param("a", "1");
        msg.set_param("a", "2");
        assert_eq!(msg.get_param("a"), Some("2".to_string()));
        msg.clear_param("a");
        assert_eq!(msg.get_param("a"), None);
    }

    #[test]
    fn copy_params_respects_name_filter() {
        let src = Message::new("src", false, 0);
        src.set_param("a", "1");
        src.set_param("b", "2");
        let dst = Message::new("dst", false, 0);
        dst.copy_params(&src, &["a".to_string()]);
        assert_eq!(dst.get_param("a"), Some("1".to_string()));
        assert_eq!(dst.get_param("b"), None);
    }

    #[test]
    fn trace_appends_params_and_passes_return_through() {
        let msg = Message::new("test", false, 0);
        let result = msg.trace(Operation::integer(42), "info", &["hello"]);
        assert_eq!(result.as_integer(), Some(42));
        assert_eq!(msg.trace_msg_count(), 1);
        assert_eq!(msg.trace_msg(0), Some("[info] hello".to_string()));
        assert_eq!(msg.get_param("trace_msg_count"), Some("1".to_string()));

        let undefined_result = msg.trace(Operation::undefined(), "info", &["again"]);
        assert!(undefined_result.is_undefined());
        assert_eq!(msg.trace_msg_count(), 2);
    }

    #[test]
    fn handled_filter_ignores_outcome_for_broadcast() {
        assert!(HandledFilter::OnlyHandled.matches(false, true));
        assert!(!HandledFilter::OnlyHandled.matches(false, false));
        assert!(HandledFilter::Any.matches(false, false));
    }

    struct RecordingTarget {
        last_handled: Mutex<Option<bool>>,
    }
    impl HandlerTarget for RecordingTarget {
        fn invoke(&self, _message: &Message, handled: Option<bool>) -> CoreResult<Operation> {
            *self.last_handled.lock().unwrap() = handled;
            Ok(Operation::undefined())
        }
    }

    #[test]
    fn enqueue_dispatches_detaches_and_fires_the_matching_callback() {
        let bus = Bus::new();
        struct AlwaysHandles;
        impl HandlerTarget for AlwaysHandles {
            fn invoke(&self, _message: &Message, _handled: Option<bool>) -> CoreResult<Operation> {
                Ok(Operation::boolean(true))
            }
        }
        bus.install_handler(Handle::new(
            "h",
            100,
            None,
            false,
            HandleVariant::Regular,
            Arc::new(AlwaysHandles),
        ));

        let msg = Message::new("call.route", false, 0);
        let callback = DispatchedCallback {
            function_name: "onDone".to_string(),
            captured_args: vec![],
            handled_filter: HandledFilter::OnlyHandled,
        };
        let recorder = RecordingTarget { last_handled: Mutex::new(None) };

        let handled = msg.enqueue(&bus, Some((&callback, &recorder)), false).unwrap();
        assert!(handled);
        assert_eq!(*recorder.last_handled.lock().unwrap(), Some(true));
        assert!(msg.is_detached());

        let result = msg.enqueue(&bus, None, false);
        assert_eq!(result, Err(BusError::Detached));
    }

    #[test]
    fn enqueue_freezes_after_transfer_when_asked() {
        let bus = Bus::new();
        let msg = Message::new("call.route", false, 0);
        msg.enqueue(&bus, None, true).unwrap();
        assert!(msg.is_frozen());
        assert!(msg.is_detached());
    }

    #[test]
    fn dispatch_does_not_detach_and_returns_false_once_detached() {
        let bus = Bus::new();
        let msg = Message::new("call.route", false, 0);
        assert!(!msg.dispatch(&bus));
        assert!(!msg.is_detached());

        msg.enqueue(&bus, None, false).unwrap();
        assert!(!msg.dispatch(&bus));
    }

    #[test]
    fn native_get_and_set_param_round_trip_through_call_native() {
        let msg = Message::new("test", false, 0);
        let ctx = Context::new(0, 1, false);
        msg.call_native("setParam", vec![Operation::string("a"), Operation::string("1")], &ctx).unwrap();
        let result = msg.call_native("getParam", vec![Operation::string("a")], &ctx).unwrap();
        assert_eq!(result.as_str(), Some("1"));
    }

    #[test]
    fn native_calls_on_a_detached_message_fail() {
        let bus = Bus::new();
        let msg = Message::new("test", false, 0);
        msg.enqueue(&bus, None, false).unwrap();
        let ctx = Context::new(0, 1, false);
        let result = msg.call_native("setParam", vec![Operation::string("a"), Operation::string("1")], &ctx);
        assert!(matches!(result, Err(CoreError::Detached)));
    }
}
