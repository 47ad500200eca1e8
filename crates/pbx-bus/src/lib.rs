//! The message bus: the `Message` bridge object, the handler/post-hook
//! registry, and queue-based hooks dispatched to a worker pool.

pub mod async_units;
pub mod bus;
pub mod error;
pub mod filter;
pub mod handle;
pub mod message;
pub mod queue;
pub mod table;

pub mod prelude {
    pub use crate::async_units::{AsyncDispatchUnit, AsyncDnsUnit, DnsResolver, Semaphore, SemaphoreWaitUnit, SleepUnit};
    pub use crate::bus::Bus;
    pub use crate::error::{BusError, BusResult};
    pub use crate::filter::{default_post_hook_filter, Filter};
    pub use crate::handle::{canonical_descriptor, Handle, HandleVariant, HandlerTarget};
    pub use crate::message::{DispatchedCallback, HandledFilter, Message};
    pub use crate::queue::{QueueHook, QueueReceiver, TrapFunc};
    pub use crate::table::Table;
}
