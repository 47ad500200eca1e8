use crate::compiled::CompiledCode;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;
use crate::script_info::ScriptInfo;
use std::collections::VecDeque;
use std::sync::Arc;

/// Runner status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Invalid,
    Running,
    Incomplete,
    Succeeded,
    Failed,
}

/// A reified "do this later" unit pushed onto a runner's async queue to
/// implement cooperative suspension.
///
/// `run` may perform blocking I/O; it must push its result onto the
/// runner's evaluation stack before returning so the backend can pick it
/// up on the next step.
pub trait AsyncUnit: Send {
    fn run(self: Box<Self>, runner: &mut Runner) -> CoreResult<()>;
}

/// Drives compiled code against a context. Everything about *what*
/// executing one step means belongs to the pluggable backend the owning
/// `CompiledCode` supplied at creation; the concrete language VM is out
/// of this crate's scope, so `Runner` only owns the stack, the async
/// queue, and the suspend/resume state machine.
pub struct Runner {
    code: Arc<dyn CompiledCode>,
    context: Arc<Context>,
    stack: Vec<Operation>,
    state: RunnerState,
    async_queue: VecDeque<Box<dyn AsyncUnit>>,
    user_data: Option<Arc<ScriptInfo>>,
    trace_id: Option<String>,
    backend: Box<dyn ExecutionBackend>,
}

/// The part of "running a script" that is language-specific and therefore
/// out of this crate's scope. A real parser/VM plugs in here; `pbx-core`'s
/// own tests use a trivial backend to exercise the suspension machinery
/// without a real language.
pub trait ExecutionBackend: Send {
    /// Advance execution. Implementations that need to suspend must first
    /// call nothing special here — the caller (`Runner::execute`) handles
    /// queued async units between calls to `step`; a backend suspends by
    /// simply returning `Incomplete` after having arranged (via whatever
    /// native call triggered it) for an async unit to already be queued.
    fn step(&mut self, stack: &mut Vec<Operation>) -> CoreResult<RunnerState>;
}

impl Runner {
    pub fn new(
        code: Arc<dyn CompiledCode>,
        context: Arc<Context>,
        backend: Box<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            code,
            context,
            stack: Vec::new(),
            state: RunnerState::Invalid,
            async_queue: VecDeque::new(),
            user_data: None,
            trace_id: None,
            backend,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn code(&self) -> &Arc<dyn CompiledCode> {
        &self.code
    }

    pub fn user_data(&self) -> Option<&Arc<ScriptInfo>> {
        self.user_data.as_ref()
    }

    pub fn set_user_data(&mut self, info: Arc<ScriptInfo>) {
        self.user_data = Some(info);
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn set_trace_id(&mut self, id: impl Into<String>) {
        self.trace_id = Some(id.into());
    }

    pub fn stack(&self) -> &[Operation] {
        &self.stack
    }

    pub fn push(&mut self, op: Operation) {
        self.stack.push(op);
    }

    pub fn pop(&mut self) -> Option<Operation> {
        self.stack.pop()
    }

    /// Enqueues an async unit. Does not itself change `state` — the caller
    /// is expected to also call `pause()` if it wants `execute()` to return
    /// to its own caller rather than draining the queue synchronously.
    pub fn queue_async(&mut self, unit: Box<dyn AsyncUnit>) {
        self.async_queue.push_back(unit);
    }

    pub fn pending_async(&self) -> usize {
        self.async_queue.len()
    }

    /// Transitions to `Incomplete`. A later `execute()` resumes from the
    /// backend's saved position.
    pub fn pause(&mut self) {
        self.state = RunnerState::Incomplete;
    }

    /// Runs until the backend reports a terminal state, or the queue is
    /// drained and the backend itself reports `Incomplete` (a genuine
    /// suspension the caller must resume later via another `execute()`).
    pub fn execute(&mut self) -> CoreResult<RunnerState> {
        if self.context.is_terminated() {
            return Err(CoreError::ContextTerminated("execute after cleanup".into()));
        }
        if !matches!(self.state, RunnerState::Invalid | RunnerState::Incomplete) {
            return Err(CoreError::NotResumable(self.state));
        }

        self.state = RunnerState::Running;
        loop {
            if let Some(unit) = self.async_queue.pop_front() {
                unit.run(self)?;
                if matches!(self.state, RunnerState::Incomplete) {
                    // A unit may re-suspend (e.g. it enqueued another unit).
                    return Ok(self.state);
                }
                continue;
            }

            let mut stack = std::mem::take(&mut self.stack);
            let result = self.backend.step(&mut stack);
            self.stack = stack;
            self.state = result?;

            match self.state {
                RunnerState::Running => continue,
                RunnerState::Incomplete if !self.async_queue.is_empty() => continue,
                _ => return Ok(self.state),
            }
        }
    }
}
