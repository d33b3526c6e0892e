// Message Dispatcher: ordered multi-producer, single-consumer event bus.

use crate::events::{EventKind, EventPayload, EventRecord, EventSink};
use crate::sync::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

const DISPATCH_WAIT: Duration = Duration::from_millis(100);

struct Shared {
    queue: Mutex<VecDeque<EventRecord>>,
    wakeup: Event,
    running: AtomicBool,
    sink: Mutex<Option<Box<dyn EventSink>>>,
    delivered: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
    // Live `MessageDispatcher` handles; the delivery thread is not counted.
    handles: AtomicUsize,
}

/// Delivers every posted event, in post order, to one sink from one thread.
///
/// Cloning yields another producer handle onto the same queue. Dropping the
/// last handle behaves like [`MessageDispatcher::shutdown`]; a sink that owns a
/// handle keeps the dispatcher alive until `shutdown` is called explicitly.
pub struct MessageDispatcher {
    shared: Arc<Shared>,
}

impl MessageDispatcher {
    /// Create a dispatcher and start its delivery thread.
    pub fn start() -> std::io::Result<Self> {
        let dispatcher = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                wakeup: Event::auto(),
                running: AtomicBool::new(true),
                sink: Mutex::new(None),
                delivered: AtomicU64::new(0),
                handle: Mutex::new(None),
                handles: AtomicUsize::new(1),
            }),
        };

        let shared = Arc::clone(&dispatcher.shared);
        let handle = thread::Builder::new()
            .name("hls-dispatch".to_string())
            .spawn(move || dispatch_loop(&shared))?;
        *dispatcher.shared.handle.lock() = Some(handle);
        Ok(dispatcher)
    }

    /// Register the sole delivery target, replacing any previous one.
    /// May be called from inside the current sink.
    pub fn set_callback<S: EventSink + 'static>(&self, sink: S) {
        *self.shared.sink.lock() = Some(Box::new(sink));
    }

    /// Queue an event. Never blocks on delivery.
    pub fn post(&self, kind: EventKind, payload: impl Into<EventPayload>) {
        let record = EventRecord::new(kind, payload.into());
        trace!(kind = %record.kind, "Posting event");
        self.shared.queue.lock().push_back(record);
        self.shared.wakeup.set();
    }

    /// Drop queued events that have not been delivered yet.
    pub fn clear(&self) {
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "Cleared undelivered events");
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the delivery thread after it drains the queue, and join it.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.wakeup.set();
        let handle = self.shared.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Shutdown requested from inside the callback; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                error!("Dispatcher thread panicked");
            }
        }
        debug!(delivered = self.delivered(), "Dispatcher stopped");
    }
}

impl Clone for MessageDispatcher {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shutdown();
        }
    }
}

fn dispatch_loop(shared: &Shared) {
    loop {
        shared.wakeup.wait(DISPATCH_WAIT);
        drain(shared);
        if !shared.running.load(Ordering::Acquire) {
            // Deliver anything posted between the drain and the flag check.
            drain(shared);
            break;
        }
    }
}

fn drain(shared: &Shared) {
    loop {
        let Some(record) = shared.queue.lock().pop_front() else {
            return;
        };
        // Neither lock is held while the sink runs.
        let taken = shared.sink.lock().take();
        if let Some(mut sink) = taken {
            sink.report(record.as_param());
            let mut slot = shared.sink.lock();
            // A sink registered during delivery wins over the one just used.
            if slot.is_none() {
                *slot = Some(sink);
            }
        }
        shared.delivered.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ReportParam;
    use std::sync::mpsc;

    #[test]
    fn delivers_in_post_order() {
        let dispatcher = MessageDispatcher::start().unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.set_callback(move |param: ReportParam<'_>| {
            tx.send(param.payload.clone()).unwrap();
        });

        for i in 0..100i64 {
            dispatcher.post(EventKind::HlsQueueDepth, i);
        }
        dispatcher.shutdown();

        let received: Vec<EventPayload> = rx.try_iter().collect();
        let expected: Vec<EventPayload> = (0..100i64).map(EventPayload::Int).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn posts_from_several_threads_keep_their_order() {
        let dispatcher = MessageDispatcher::start().unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.set_callback(move |param: ReportParam<'_>| {
            tx.send(param.payload.clone()).unwrap();
        });

        for label in ["A", "B", "C"] {
            let producer = dispatcher.clone();
            thread::spawn(move || producer.post(EventKind::Diagnosis, label))
                .join()
                .unwrap();
        }
        dispatcher.shutdown();

        let received: Vec<EventPayload> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                EventPayload::from("A"),
                EventPayload::from("B"),
                EventPayload::from("C")
            ]
        );
    }

    #[test]
    fn callback_runs_on_a_single_thread() {
        let dispatcher = MessageDispatcher::start().unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.set_callback(move |_: ReportParam<'_>| {
            tx.send(thread::current().id()).unwrap();
        });

        let mut producers = Vec::new();
        for i in 0..4i64 {
            let producer = dispatcher.clone();
            producers.push(thread::spawn(move || {
                for j in 0..25 {
                    producer.post(EventKind::HlsQueueDepth, i * 100 + j);
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        dispatcher.shutdown();

        let ids: Vec<_> = rx.try_iter().collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_ne!(ids[0], thread::current().id());
    }

    #[test]
    fn clear_drops_undelivered_events() {
        let dispatcher = MessageDispatcher::start().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        dispatcher.set_callback(move |_: ReportParam<'_>| {
            tx.send(()).unwrap();
            // Hold the dispatcher inside the first delivery until released.
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        });

        dispatcher.post(EventKind::HlsQueueDepth, 1i64);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        dispatcher.post(EventKind::HlsQueueDepth, 2i64);
        dispatcher.post(EventKind::HlsQueueDepth, 3i64);
        dispatcher.clear();
        assert_eq!(dispatcher.pending(), 0);
        gate_tx.send(()).unwrap();
        dispatcher.shutdown();

        assert_eq!(dispatcher.delivered(), 1);
    }

    #[test]
    fn callback_may_replace_itself() {
        let dispatcher = MessageDispatcher::start().unwrap();
        let (tx, rx) = mpsc::channel();
        let producer = dispatcher.clone();
        let first_tx = tx.clone();
        dispatcher.set_callback(move |_: ReportParam<'_>| {
            first_tx.send("first").unwrap();
            let tx = tx.clone();
            producer.set_callback(move |_: ReportParam<'_>| {
                tx.send("second").unwrap();
            });
        });

        dispatcher.post(EventKind::HlsQueueDepth, 1i64);
        dispatcher.post(EventKind::HlsQueueDepth, 2i64);
        dispatcher.post(EventKind::HlsQueueDepth, 3i64);
        dispatcher.shutdown();

        let received: Vec<&str> = rx.try_iter().collect();
        assert_eq!(received, vec!["first", "second", "second"]);
    }

    #[test]
    fn dropping_last_handle_drains_and_joins() {
        let (tx, rx) = mpsc::channel();
        {
            let dispatcher = MessageDispatcher::start().unwrap();
            dispatcher.set_callback(move |param: ReportParam<'_>| {
                tx.send(param.payload.clone()).unwrap();
            });
            let producer = dispatcher.clone();
            producer.post(EventKind::HlsQueueDepth, 1i64);
            drop(producer);
            assert!(dispatcher.is_running());
            dispatcher.post(EventKind::HlsQueueDepth, 2i64);
        }

        // The sink, and with it the sender, is gone once the thread stopped.
        let received: Vec<EventPayload> = rx.iter().collect();
        assert_eq!(received, vec![EventPayload::Int(1), EventPayload::Int(2)]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dispatcher = MessageDispatcher::start().unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn events_without_sink_are_consumed() {
        let dispatcher = MessageDispatcher::start().unwrap();
        dispatcher.post(EventKind::SystemFinished, EventPayload::None);
        dispatcher.shutdown();
        assert_eq!(dispatcher.delivered(), 1);
    }
}
