//! Everything that owns a running script beyond the bus: the global
//! script catalog and its reload lifecycle, the per-call channel
//! assistant, and the timer/event worker both of those hand events to.

pub mod assistant;
pub mod error;
pub mod event_worker;
pub mod manager;

pub mod prelude {
    pub use crate::assistant::{CallState, CallbackInvoker, ChannelAssistant, ChannelCallbacks};
    pub use crate::error::{RuntimeError, RuntimeResult};
    pub use crate::event_worker::{EventKind, EventWorker, FiredEvent};
    pub use crate::manager::{ScriptLoader, ScriptManager, ScriptType};
}
