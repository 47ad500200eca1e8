use crate::filter::Filter;
use crate::message::Message;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Invoked by a worker thread for each accepted message.
pub trait QueueReceiver: Send + Sync {
    fn received(&self, message: Arc<Message>);
}

/// Invoked exactly once per empty-to-over-threshold transition of the
/// pending count.
pub trait TrapFunc: Send + Sync {
    fn trap(&self);
}

/// One `Message.installHook` registration: a name-plus-param-equality
/// filter set dispatched to a bounded thread pool.
pub struct QueueHook {
    name: String,
    filters: Vec<(String, String)>,
    sender: Sender<Arc<Message>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    trap: Option<(usize, Arc<dyn TrapFunc>)>,
    over_threshold: Arc<AtomicBool>,
}

impl QueueHook {
    pub fn install(
        name: impl Into<String>,
        filters: Vec<(String, String)>,
        threads: usize,
        receiver: Arc<dyn QueueReceiver>,
        trap: Option<(usize, Arc<dyn TrapFunc>)>,
    ) -> Self {
        let (sender, raw_receiver) = mpsc::channel::<Arc<Message>>();
        let shared_receiver = Arc::new(Mutex::new(raw_receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let over_threshold = Arc::new(AtomicBool::new(false));
        let threshold = trap.as_ref().map(|(t, _)| *t);

        let mut workers = Vec::with_capacity(threads.max(1));
        for _ in 0..threads.max(1) {
            let shared_receiver = shared_receiver.clone();
            let receiver_target = receiver.clone();
            let pending = pending.clone();
            let over_threshold = over_threshold.clone();
            workers.push(std::thread::spawn(move || loop {
                let message = shared_receiver.lock().unwrap().recv();
                let Ok(message) = message else { break };
                receiver_target.received(message);
                let remaining = pending.fetch_sub(1, Ordering::AcqRel) - 1;
                if let Some(threshold) = threshold {
                    if remaining <= threshold {
                        over_threshold.store(false, Ordering::Release);
                    }
                }
            }));
        }

        Self { name: name.into(), filters, sender, workers, pending, trap, over_threshold }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Two filter sets "compare equal" only if they have the same keys
    /// and the same values — order-independent.
    pub fn filters_equal(&self, other: &[(String, String)]) -> bool {
        if self.filters.len() != other.len() {
            return false;
        }
        self.filters.iter().all(|(k, v)| other.iter().any(|(ok, ov)| ok == k && ov == v))
    }

    pub fn accepts(&self, message: &Message) -> bool {
        self.filters.iter().all(|(name, value)| message.get_param(name).as_deref() == Some(value.as_str()))
    }

    /// Accepts the message asynchronously, firing the trap on the next
    /// empty-to-over-threshold transition.
    pub fn enqueue(&self, message: Arc<Message>) {
        let now_pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.sender.send(message);

        if let Some((threshold, trap_func)) = &self.trap {
            if now_pending > *threshold && self.over_threshold.swap(true, Ordering::AcqRel) == false {
                trap_func.trap();
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Builds a filter tree equivalent to this hook's name-plus-param
/// equality set, for callers that want to compose it with [`Filter`].
pub fn filters_to_tree(filters: &[(String, String)]) -> Option<Filter> {
    let mut items: Vec<Filter> = filters.iter().map(|(k, v)| Filter::value(k.clone(), v.clone())).collect();
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(Filter::All(items)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    struct CountingReceiver {
        sender: Mutex<Sender<()>>,
    }
    impl QueueReceiver for CountingReceiver {
        fn received(&self, _message: Arc<Message>) {
            let _ = self.sender.lock().unwrap().send(());
        }
    }

    struct CountingTrap {
        sender: Mutex<Sender<()>>,
    }
    impl TrapFunc for CountingTrap {
        fn trap(&self) {
            let _ = self.sender.lock().unwrap().send(());
        }
    }

    #[test]
    fn enqueued_messages_are_delivered_to_the_receiver() {
        let (done_tx, done_rx) = channel();
        let receiver = Arc::new(CountingReceiver { sender: Mutex::new(done_tx) });
        let hook = QueueHook::install("h", vec![("dest".into(), "sip".into())], 2, receiver, None);

        let msg = Arc::new(Message::new("call.route", false, 0));
        msg.set_param("dest", "sip");
        assert!(hook.accepts(&msg));
        hook.enqueue(msg);

        done_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn filters_equal_ignores_order() {
        let (tx, _rx) = channel();
        let receiver = Arc::new(CountingReceiver { sender: Mutex::new(tx) });
        let hook = QueueHook::install(
            "h",
            vec![("a".into(), "1".into()), ("b".into(), "2".into())],
            1,
            receiver,
            None,
        );
        assert!(hook.filters_equal(&[("b".into(), "2".into()), ("a".into(), "1".into())]));
        assert!(!hook.filters_equal(&[("a".into(), "1".into())]));
    }

    #[test]
    fn rejects_messages_not_matching_the_equality_set() {
        let (tx, _rx) = channel();
        let receiver = Arc::new(CountingReceiver { sender: Mutex::new(tx) });
        let hook = QueueHook::install("h", vec![("dest".into(), "sip".into())], 1, receiver, None);
        let msg = Message::new("call.route", false, 0);
        msg.set_param("dest", "pstn");
        assert!(!hook.accepts(&msg));
    }

    #[test]
    fn trap_fires_once_on_empty_to_over_threshold_transition() {
        let (trap_tx, trap_rx) = channel();
        let (recv_tx, _recv_rx) = channel();
        let trap = Arc::new(CountingTrap { sender: Mutex::new(trap_tx) });
        // Zero workers would never drain, so use a receiver that blocks
        // briefly by not draining: we just check the synchronous trap
        // signal fired from `enqueue`, independent of worker timing.
        let receiver = Arc::new(CountingReceiver { sender: Mutex::new(recv_tx) });
        let hook = QueueHook::install("h", vec![], 1, receiver, Some((0, trap)));

        hook.enqueue(Arc::new(Message::new("m", false, 0)));
        trap_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
    }
}
