use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Tracks how many objects have been allocated under a context, when
/// `track_objects`/`track_obj_life` is enabled.
#[derive(Default, Debug)]
pub struct AllocationTracker {
    live: AtomicUsize,
    total: AtomicUsize,
}

impl AllocationTracker {
    pub fn record_alloc(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_free(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

/// Per-instance root mutable namespace plus the mutex that serialises all
/// user state owned by this context.
pub struct Context {
    globals: Mutex<FxHashMap<String, Operation>>,
    /// Serialises access to everything this context owns. Native code may
    /// release it only around pure I/O.
    lock: Arc<Mutex<()>>,
    allocations: Option<Arc<AllocationTracker>>,
    instance_index: u32,
    instance_count: u32,
    terminated: AtomicBool,
}

impl Context {
    pub fn new(instance_index: u32, instance_count: u32, track_allocations: bool) -> Self {
        Self {
            globals: Mutex::new(FxHashMap::default()),
            lock: Arc::new(Mutex::new(())),
            allocations: track_allocations.then(|| Arc::new(AllocationTracker::default())),
            instance_index,
            instance_count,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn allocations(&self) -> Option<&Arc<AllocationTracker>> {
        self.allocations.as_ref()
    }

    /// The mutex that objects created by this context carry as their
    /// `context_mutex`. Shared so native code can hold it across a call.
    pub fn lock_handle(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> CoreResult<()> {
        if self.is_terminated() {
            return Err(CoreError::ContextTerminated(format!(
                "instance {}/{}",
                self.instance_index, self.instance_count
            )));
        }
        Ok(())
    }

    pub fn set_global(&self, name: impl Into<String>, value: Operation) -> CoreResult<()> {
        self.check_alive()?;
        let _guard = self.lock.lock().unwrap();
        self.globals.lock().unwrap().insert(name.into(), value);
        Ok(())
    }

    pub fn get_global(&self, name: &str) -> CoreResult<Option<Operation>> {
        self.check_alive()?;
        let _guard = self.lock.lock().unwrap();
        Ok(self.globals.lock().unwrap().get(name).cloned())
    }

    /// Clears the namespace. After this, any access must be rejected even if
    /// it manages to acquire the mutex.
    pub fn cleanup(&self) {
        let _guard = self.lock.lock().unwrap();
        self.globals.lock().unwrap().clear();
        self.terminated.store(true, Ordering::Release);
    }
}
