use crate::bus::Bus;
use crate::message::Message;
use pbx_core::prelude::{AsyncUnit, CoreResult, Operation, Runner};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Backs `sleep(ms)`/`usleep(us)`/`yield()`/`idle()`: blocks the worker
/// thread driving this runner's async queue for `duration`, then pushes
/// `undefined` so the backend can resume.
pub struct SleepUnit {
    pub duration: Duration,
}

impl AsyncUnit for SleepUnit {
    fn run(self: Box<Self>, runner: &mut Runner) -> CoreResult<()> {
        std::thread::sleep(self.duration);
        runner.push(Operation::undefined());
        Ok(())
    }
}

/// Backs `Message.dispatch(async=true)`: performs the dispatch on this
/// async unit's own thread, pushing the handled boolean as the result.
pub struct AsyncDispatchUnit {
    pub bus: Arc<Bus>,
    pub message: Arc<Message>,
}

impl AsyncUnit for AsyncDispatchUnit {
    fn run(self: Box<Self>, runner: &mut Runner) -> CoreResult<()> {
        let handled = self.bus.dispatch(&self.message);
        runner.push(Operation::boolean(handled));
        Ok(())
    }
}

/// Backs `DNS.query(..., async=true)`. The concrete resolver is a host
/// collaborator outside this crate's scope; this unit only fixes the
/// suspend/resume contract around it.
pub trait DnsResolver: Send + Sync {
    fn resolve(&self, query: &str) -> Option<String>;
}

pub struct AsyncDnsUnit {
    pub resolver: Arc<dyn DnsResolver>,
    pub query: String,
}

impl AsyncUnit for AsyncDnsUnit {
    fn run(self: Box<Self>, runner: &mut Runner) -> CoreResult<()> {
        let result = self.resolver.resolve(&self.query);
        runner.push(result.map(Operation::string).unwrap_or_else(Operation::null));
        Ok(())
    }
}

/// A counting semaphore scripts can `wait()` on with a timeout, backing
/// `Semaphore.wait(timeout)`.
#[derive(Default)]
pub struct Semaphore {
    state: Mutex<u32>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(initial), condvar: Condvar::new() })
    }

    pub fn signal(&self) {
        let mut guard = self.state.lock().unwrap();
        *guard += 1;
        self.condvar.notify_one();
    }

    /// Blocks up to `timeout` for a signal; returns whether it acquired one.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (mut guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |count| *count == 0)
            .unwrap();
        if *guard > 0 && !result.timed_out() {
            *guard -= 1;
            true
        } else {
            false
        }
    }
}

pub struct SemaphoreWaitUnit {
    pub semaphore: Arc<Semaphore>,
    pub timeout: Duration,
}

impl AsyncUnit for SemaphoreWaitUnit {
    fn run(self: Box<Self>, runner: &mut Runner) -> CoreResult<()> {
        let acquired = self.semaphore.wait(self.timeout);
        runner.push(Operation::boolean(acquired));
        Ok(())
    }
}
