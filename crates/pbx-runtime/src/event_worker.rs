use pbx_core::prelude::Operation;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Distinguishes a non-time event's kind; lower `type_value()` wins when
/// multiple events are ready at the same moment (reinit before timer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ReInit,
    Timer,
    Custom(String),
}

impl EventKind {
    fn type_value(&self) -> u8 {
        match self {
            EventKind::ReInit => 0,
            EventKind::Custom(_) => 1,
            EventKind::Timer => 2,
        }
    }
}

struct TimeEvent {
    id: u64,
    interval_ms: u64,
    repeat: bool,
    function_name: String,
    args: Vec<Operation>,
    next_fire_time_ms: u64,
}

struct InstalledEvent {
    id: u64,
    kind: EventKind,
    function_name: String,
    args: Vec<Operation>,
    repeat: bool,
}

/// An event ready to run, produced by [`EventWorker::tick`] or
/// [`EventWorker::trigger`].
#[derive(Debug, Clone)]
pub struct FiredEvent {
    pub id: u64,
    pub kind: EventKind,
    pub function_name: String,
    pub args: Vec<Operation>,
}

/// One worker per root script `Engine` object, created lazily on first
/// registration. Multiplexes time events (sorted by `nextFireTime`) and
/// non-time events (posted by an external trigger) into a single delivery
/// order.
#[derive(Default)]
pub struct EventWorker {
    time_events: Mutex<Vec<TimeEvent>>,
    installed: Mutex<Vec<InstalledEvent>>,
    delivery: Mutex<Vec<FiredEvent>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl EventWorker {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn schedule_timer(
        &self,
        interval_ms: u64,
        repeat: bool,
        function_name: impl Into<String>,
        args: Vec<Operation>,
        now_ms: u64,
    ) -> u64 {
        let id = self.alloc_id();
        let mut events = self.time_events.lock().unwrap();
        events.push(TimeEvent {
            id,
            interval_ms,
            repeat,
            function_name: function_name.into(),
            args,
            next_fire_time_ms: now_ms + interval_ms,
        });
        events.sort_by_key(|e| e.next_fire_time_ms);
        id
    }

    pub fn install_non_time(
        &self,
        kind: EventKind,
        function_name: impl Into<String>,
        args: Vec<Operation>,
        repeat: bool,
    ) -> u64 {
        let id = self.alloc_id();
        self.installed.lock().unwrap().push(InstalledEvent {
            id,
            kind,
            function_name: function_name.into(),
            args,
            repeat,
        });
        id
    }

    /// Removing a time-event id only removes time events; a non-time id
    /// only removes non-time events. In-flight callbacks already popped
    /// by [`tick`]/[`trigger`] are unaffected.
    pub fn remove_timer(&self, id: u64) {
        self.time_events.lock().unwrap().retain(|e| e.id != id);
    }

    pub fn remove_non_time(&self, id: u64) {
        self.installed.lock().unwrap().retain(|e| e.id != id);
    }

    /// External trigger (e.g. configuration re-init): posts copies of
    /// every installed event of `kind` into the delivery list. Repeatable
    /// events stay installed; one-shot events are moved out.
    pub fn trigger(&self, kind: &EventKind) {
        let mut installed = self.installed.lock().unwrap();
        let mut delivery = self.delivery.lock().unwrap();
        let mut remaining = Vec::with_capacity(installed.len());
        for event in installed.drain(..) {
            if &event.kind == kind {
                delivery.push(FiredEvent {
                    id: event.id,
                    kind: event.kind.clone(),
                    function_name: event.function_name.clone(),
                    args: event.args.clone(),
                });
                if event.repeat {
                    remaining.push(event);
                }
            } else {
                remaining.push(event);
            }
        }
        *installed = remaining;
    }

    /// Pops every event due at or before `now_ms`, in delivery order:
    /// among events ready at the same moment, lower `type_value()` wins.
    pub fn tick(&self, now_ms: u64) -> Vec<FiredEvent> {
        if self.stopped.load(Ordering::Acquire) {
            return Vec::new();
        }

        let mut due: Vec<(u64, u8, FiredEvent)> = Vec::new();

        {
            let mut delivery = self.delivery.lock().unwrap();
            for event in delivery.drain(..) {
                let type_value = event.kind.type_value();
                due.push((now_ms, type_value, event));
            }
        }

        {
            let mut events = self.time_events.lock().unwrap();
            let mut fired_indices = Vec::new();
            for (idx, event) in events.iter().enumerate() {
                if event.next_fire_time_ms <= now_ms {
                    fired_indices.push(idx);
                }
            }
            let mut rescheduled = Vec::new();
            for &idx in fired_indices.iter().rev() {
                let mut event = events.remove(idx);
                due.push((
                    event.next_fire_time_ms,
                    EventKind::Timer.type_value(),
                    FiredEvent {
                        id: event.id,
                        kind: EventKind::Timer,
                        function_name: event.function_name.clone(),
                        args: event.args.clone(),
                    },
                ));
                if event.repeat {
                    event.next_fire_time_ms = now_ms + event.interval_ms;
                    rescheduled.push(event);
                }
            }
            events.extend(rescheduled);
            events.sort_by_key(|e| e.next_fire_time_ms);
        }

        due.sort_by_key(|(fire_time, type_value, _)| (*fire_time, *type_value));
        due.into_iter().map(|(_, _, event)| event).collect()
    }

    /// Refuses to dispatch further timers; does not kill an in-flight
    /// callback, which is the caller's own problem since this worker
    /// never holds a handle to one.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
