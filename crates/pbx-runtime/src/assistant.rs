use crate::error::{RuntimeError, RuntimeResult};
use pbx_bus::prelude::{Bus, Message};
use pbx_core::prelude::{CoreResult, Operation};
use std::sync::{Arc, Mutex};

/// Per-call lifecycle state, keyed by channel id. Monotonically advances
/// except that `Routing` may additionally advance to `ReRoute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    Routing,
    ReRoute,
    Ended,
    Hangup,
}

impl CallState {
    fn rank(self) -> u8 {
        match self {
            CallState::NotStarted => 0,
            CallState::Routing | CallState::ReRoute => 1,
            CallState::Ended => 2,
            CallState::Hangup => 3,
        }
    }

    fn can_advance_to(self, next: CallState) -> bool {
        if self == CallState::ReRoute && next == CallState::Routing {
            return false;
        }
        if next == CallState::ReRoute {
            return self == CallState::Routing;
        }
        next.rank() >= self.rank()
    }
}

/// Runs one named function in a fresh runner bound to a channel, with
/// `message` attached as `Channel.message` (frozen iff `frozen`). The
/// concrete script language is an external collaborator, same boundary
/// as the message bus's `HandlerTarget`. `handled` is `Some` only for the
/// lifecycle points whose callback takes a second boolean argument
/// (currently `onPostExecute(message, handled)`); every other call site
/// passes `None`.
pub trait CallbackInvoker: Send + Sync {
    fn invoke(&self, function_name: &str, message: &Message, frozen: bool, handled: Option<bool>) -> CoreResult<Operation>;
}

/// Which user function name, if any, backs each lifecycle point.
#[derive(Default, Clone)]
pub struct ChannelCallbacks {
    pub on_startup: Option<String>,
    pub on_hangup: Option<String>,
    pub on_execute: Option<String>,
    pub on_ringing: Option<String>,
    pub on_answered: Option<String>,
    pub on_preroute: Option<String>,
    pub on_route: Option<String>,
    pub on_disconnected: Option<String>,
    pub on_post_execute: Option<String>,
}

fn as_bool(op: &Operation) -> bool {
    op.as_bool().unwrap_or(false)
}

/// A per-call object holding the routing runner, the lifecycle state, and
/// the handled flag delivered to the engine.
pub struct ChannelAssistant {
    channel_id: String,
    state: Mutex<CallState>,
    callbacks: ChannelCallbacks,
    invoker: Arc<dyn CallbackInvoker>,
    bus: Option<Arc<Bus>>,
}

impl ChannelAssistant {
    pub fn new(channel_id: impl Into<String>, callbacks: ChannelCallbacks, invoker: Arc<dyn CallbackInvoker>, bus: Option<Arc<Bus>>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state: Mutex::new(CallState::NotStarted),
            callbacks,
            invoker,
            bus,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn state(&self) -> CallState {
        *self.state.lock().unwrap()
    }

    fn advance(&self, next: CallState) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.can_advance_to(next) {
            return Err(RuntimeError::ExecutionFailed(format!(
                "channel '{}' cannot move from {:?} to {:?}",
                self.channel_id, *state, next
            )));
        }
        *state = next;
        Ok(())
    }

    fn call_optional(
        &self,
        function_name: &Option<String>,
        message: &Message,
        frozen: bool,
        handled: Option<bool>,
    ) -> RuntimeResult<Option<Operation>> {
        match function_name {
            Some(name) => self
                .invoker
                .invoke(name, message, frozen, handled)
                .map(Some)
                .map_err(|e| RuntimeError::ExecutionFailed(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn on_startup(&self, message: &Message) -> RuntimeResult<()> {
        self.call_optional(&self.callbacks.on_startup, message, true, None)?;
        Ok(())
    }

    pub fn on_hangup(&self, message: &Message) -> RuntimeResult<()> {
        self.call_optional(&self.callbacks.on_hangup, message, true, None)?;
        self.advance(CallState::Hangup)
    }

    pub fn on_execute(&self, message: &Message) -> RuntimeResult<()> {
        self.call_optional(&self.callbacks.on_execute, message, true, None)?;
        Ok(())
    }

    pub fn msg_ringing(&self, message: &Message) -> RuntimeResult<bool> {
        let result = self.call_optional(&self.callbacks.on_ringing, message, true, None)?;
        Ok(result.map(|op| as_bool(&op)).unwrap_or(false))
    }

    pub fn msg_answered(&self, message: &Message) -> RuntimeResult<bool> {
        let result = self.call_optional(&self.callbacks.on_answered, message, true, None)?;
        Ok(result.map(|op| as_bool(&op)).unwrap_or(false))
    }

    pub fn msg_preroute(&self, message: &Message) -> RuntimeResult<bool> {
        if self.state() == CallState::NotStarted {
            self.advance(CallState::Routing)?;
        }
        let result = self.call_optional(&self.callbacks.on_preroute, message, true, None)?;
        Ok(result.map(|op| as_bool(&op)).unwrap_or(false))
    }

    /// Runs the main script body with a live, non-frozen binding. Returns
    /// whether the script set the message's handled flag during this run.
    fn run_route_body(&self, message: &Message) -> RuntimeResult<bool> {
        self.call_optional(&self.callbacks.on_route, message, false, None)?;
        Ok(message.handled())
    }

    /// `call.route`: returns true if the script set the handled flag.
    pub fn msg_route(&self, message: &Message) -> RuntimeResult<bool> {
        if self.state() == CallState::NotStarted {
            self.advance(CallState::Routing)?;
        }
        self.run_route_body(message)
    }

    /// `chan.disconnected`: if `onDisconnected` didn't mark the message
    /// handled and we're mid-routing, re-enters the main body as a
    /// reroute.
    pub fn msg_disconnected(&self, message: &Message) -> RuntimeResult<bool> {
        self.call_optional(&self.callbacks.on_disconnected, message, true, None)?;
        if message.handled() {
            return Ok(true);
        }
        if self.state() == CallState::Routing {
            self.advance(CallState::ReRoute)?;
            return self.run_route_body(message);
        }
        Ok(false)
    }

    /// `onPostExecute(message, handled)`: the one lifecycle callback that
    /// takes the handled outcome as an explicit second argument.
    pub fn msg_post_execute(&self, message: &Message, handled: bool) -> RuntimeResult<()> {
        self.call_optional(&self.callbacks.on_post_execute, message, true, Some(handled))?;
        Ok(())
    }

    /// `Channel.callTo(target, ...)`: marks the message handled with
    /// `target` as the return value; the runner is expected to pause
    /// separately so control returns to the host.
    pub fn call_to(&self, message: &Message, target: &str) {
        message.set_ret_value(target);
        message.set_handled(true);
    }

    /// `Channel.callJust(target, ...)`: like `callTo` but also ends the
    /// script.
    pub fn call_just(&self, message: &Message, target: &str) -> RuntimeResult<()> {
        self.call_to(message, target);
        self.advance(CallState::Ended)
    }

    /// `Channel.hangup([reason, ...])`: stamps the reason and enqueues
    /// `call.drop` for this channel, then ends the script.
    pub fn hangup(&self, message: &Message, reason: Option<&str>, now_ms: u64) -> RuntimeResult<()> {
        if let Some(reason) = reason {
            message.set_param("reason", reason);
        }
        if let Some(bus) = &self.bus {
            let drop_msg = Message::new("call.drop", false, now_ms);
            drop_msg.set_param("id", self.channel_id.clone());
            if let Some(reason) = reason {
                drop_msg.set_param("reason", reason);
            }
            bus.dispatch(&drop_msg);
        }
        self.advance(CallState::Ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoInvoker;
    impl CallbackInvoker for EchoInvoker {
        fn invoke(&self, function_name: &str, _message: &Message, _frozen: bool, _handled: Option<bool>) -> CoreResult<Operation> {
            Ok(Operation::boolean(
                function_name == "onRinging" || function_name == "onAnswered" || function_name == "onPreroute",
            ))
        }
    }

    fn assistant() -> ChannelAssistant {
        let callbacks = ChannelCallbacks {
            on_ringing: Some("onRinging".into()),
            on_answered: Some("onAnswered".into()),
            on_preroute: Some("onPreroute".into()),
            on_route: Some("onRoute".into()),
            on_disconnected: Some("onDisconnected".into()),
            on_hangup: Some("onHangup".into()),
            ..Default::default()
        };
        ChannelAssistant::new("chan/1", callbacks, Arc::new(EchoInvoker), None)
    }

    #[test]
    fn msg_route_returns_whether_the_script_marked_handled() {
        let assistant = assistant();
        let message = Message::new("call.route", false, 0);
        message.set_handled(true);
        let handled = assistant.msg_route(&message).unwrap();
        assert!(handled);
        assert_eq!(assistant.state(), CallState::Routing);
    }

    #[test]
    fn msg_ringing_answered_preroute_return_callback_result() {
        let assistant = assistant();
        let message = Message::new("call.ringing", false, 0);
        assert!(assistant.msg_ringing(&message).unwrap());
        assert!(assistant.msg_answered(&message).unwrap());
        assert!(assistant.msg_preroute(&message).unwrap());
    }

    #[test]
    fn disconnected_reroutes_when_not_already_handled() {
        let assistant = assistant();
        let message = Message::new("call.route", false, 0);
        message.set_handled(true);
        assistant.msg_route(&message).unwrap();

        let disconnect_msg = Message::new("chan.disconnected", false, 0);
        let handled = assistant.msg_disconnected(&disconnect_msg).unwrap();
        assert!(handled);
        assert_eq!(assistant.state(), CallState::ReRoute);
    }

    #[test]
    fn call_just_ends_the_script() {
        let assistant = assistant();
        let message = Message::new("call.route", false, 0);
        assistant.msg_route(&message).unwrap();
        assistant.call_just(&message, "sip/endpoint").unwrap();
        assert_eq!(message.ret_value(), "sip/endpoint");
        assert!(message.handled());
        assert_eq!(assistant.state(), CallState::Ended);
    }

    #[test]
    fn hangup_dispatches_call_drop_and_ends() {
        let bus = Arc::new(Bus::new());
        let callbacks = ChannelCallbacks::default();
        let assistant = ChannelAssistant::new("chan/2", callbacks, Arc::new(EchoInvoker), Some(bus));
        let message = Message::new("call.route", false, 0);
        assistant.hangup(&message, Some("busy"), 0).unwrap();
        assert_eq!(message.get_param("reason"), Some("busy".to_string()));
        assert_eq!(assistant.state(), CallState::Ended);
    }

    #[test]
    fn state_transitions_reject_moving_backwards() {
        let assistant = assistant();
        let message = Message::new("call.route", false, 0);
        assistant.msg_route(&message).unwrap();
        assistant.call_just(&message, "x").unwrap();
        assert!(assistant.advance(CallState::Routing).is_err());
    }

    #[test]
    fn reroute_cannot_move_back_to_routing() {
        assert!(!CallState::ReRoute.can_advance_to(CallState::Routing));
        assert!(CallState::Routing.can_advance_to(CallState::ReRoute));
    }

    struct RecordingInvoker {
        last_handled: Mutex<Option<Option<bool>>>,
    }
    impl CallbackInvoker for RecordingInvoker {
        fn invoke(&self, _function_name: &str, _message: &Message, _frozen: bool, handled: Option<bool>) -> CoreResult<Operation> {
            *self.last_handled.lock().unwrap() = Some(handled);
            Ok(Operation::undefined())
        }
    }

    #[test]
    fn post_execute_passes_the_handled_flag_to_the_callback() {
        let callbacks = ChannelCallbacks { on_post_execute: Some("onPostExecute".into()), ..Default::default() };
        let invoker = Arc::new(RecordingInvoker { last_handled: Mutex::new(None) });
        let assistant = ChannelAssistant::new("chan/3", callbacks, invoker.clone(), None);
        let message = Message::new("call.execute", false, 0);

        assistant.msg_post_execute(&message, true).unwrap();
        assert_eq!(*invoker.last_handled.lock().unwrap(), Some(Some(true)));

        assistant.msg_post_execute(&message, false).unwrap();
        assert_eq!(*invoker.last_handled.lock().unwrap(), Some(Some(false)));
    }
}
