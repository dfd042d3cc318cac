//! Event emitter
//!
//! Engine listeners run on runtime threads and must never call into the
//! foreign side directly. They push [`Event`]s into an unbounded queue that a
//! single dedicated thread drains, handing each event to the registered sink
//! in FIFO order.

use crate::message::Event;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Thread name of the event dispatch thread
pub const EVENT_THREAD_NAME: &str = "rtc-bridge-events";

/// Receiver of asynchronous events
///
/// Called on the event dispatch thread, one event at a time. The event and
/// any pointers derived from it are only valid for the duration of the call.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

type SharedSink = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

enum Envelope {
    Event(Event),
    Shutdown,
}

/// Cloneable producer side of the event queue
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    /// Queue an event for delivery
    pub fn emit(&self, event: Event) {
        if self.tx.send(Envelope::Event(event)).is_err() {
            debug!("Event dropped, emitter shut down");
        }
    }
}

/// Owns the event queue and its dispatch thread
pub struct EventEmitter {
    sender: EventSender,
    sink: SharedSink,
    thread: Option<JoinHandle<()>>,
}

impl EventEmitter {
    /// Start the dispatch thread
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: SharedSink = Arc::new(RwLock::new(None));

        let thread_sink = Arc::clone(&sink);
        let thread = std::thread::Builder::new()
            .name(EVENT_THREAD_NAME.to_string())
            .spawn(move || dispatch_loop(rx, thread_sink))
            .map_err(|e| Error::Internal(format!("Failed to spawn event thread: {}", e)))?;

        Ok(Self {
            sender: EventSender { tx },
            sink,
            thread: Some(thread),
        })
    }

    /// Producer handle for engine listeners
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Queue an event for delivery
    pub fn emit(&self, event: Event) {
        self.sender.emit(event);
    }

    /// Replace the sink, returning the previous one
    ///
    /// `None` clears it; events dispatched while no sink is set are dropped.
    pub fn set_sink(&self, sink: Option<Arc<dyn EventSink>>) -> Option<Arc<dyn EventSink>> {
        std::mem::replace(&mut *self.sink.write(), sink)
    }

    /// Whether a sink is registered
    pub fn has_sink(&self) -> bool {
        self.sink.read().is_some()
    }
}

fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Envelope>, sink: SharedSink) {
    while let Some(envelope) = rx.blocking_recv() {
        let event = match envelope {
            Envelope::Event(event) => event,
            Envelope::Shutdown => break,
        };

        // Clone the sink out so it can be replaced from inside a callback.
        let current = sink.read().clone();
        match current {
            Some(sink) => {
                let delivered = catch_unwind(AssertUnwindSafe(|| sink.on_event(&event)));
                if delivered.is_err() {
                    error!(
                        "Event sink panicked on {:?} event",
                        event.message_type()
                    );
                }
            }
            None => debug!(
                "No event sink registered, dropping {:?} event",
                event.message_type()
            ),
        }
    }
    debug!("Event dispatch thread exiting");
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        let _ = self.sender.tx.send(Envelope::Shutdown);
        if let Some(thread) = self.thread.take() {
            // The last owner may be dropped from within a sink callback.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn open(channel: usize) -> Event {
        Event::ChannelOpen {
            channel: Handle::from_raw(channel),
        }
    }

    #[test]
    fn test_events_delivered_in_order() {
        let emitter = EventEmitter::new().unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        emitter.set_sink(Some(Arc::new(move |event: &Event| {
            let _ = tx.lock().send(event.clone());
        })));

        for i in 1..=50 {
            emitter.emit(open(i));
        }

        for i in 1..=50 {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(event, open(i));
        }
    }

    #[test]
    fn test_events_delivered_on_event_thread() {
        let emitter = EventEmitter::new().unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        emitter.set_sink(Some(Arc::new(move |_: &Event| {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.lock().send(name);
        })));

        emitter.sender().emit(open(1));
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some(EVENT_THREAD_NAME));
    }

    #[test]
    fn test_set_sink_returns_previous() {
        let emitter = EventEmitter::new().unwrap();
        assert!(!emitter.has_sink());
        assert!(emitter.set_sink(Some(Arc::new(|_: &Event| {}))).is_none());
        assert!(emitter.has_sink());
        assert!(emitter.set_sink(None).is_some());
        assert!(!emitter.has_sink());
    }

    #[test]
    fn test_panicking_sink_does_not_stop_dispatch() {
        let emitter = EventEmitter::new().unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        emitter.set_sink(Some(Arc::new(move |event: &Event| {
            if *event == open(1) {
                panic!("sink failure");
            }
            let _ = tx.lock().send(event.clone());
        })));

        emitter.emit(open(1));
        emitter.emit(open(2));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), open(2));
    }

    #[test]
    fn test_emit_after_drop_is_ignored() {
        let emitter = EventEmitter::new().unwrap();
        let sender = emitter.sender();
        drop(emitter);
        sender.emit(open(1));
    }
}
