//! Scheduler events and the FIFO queue they travel through.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Phase kinds of one measurement cycle, plus the out-of-band events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ConfigureAccessPoint,
    TestConnection,
    PrintTime,
    GetSensorData,
    PublishData,
    GoToSleep,
    ErrorOccurred,
    /// Operator requested sensor read; leaves the cycle token alone.
    TestDataAcquisition,
}

/// Callback invoked once an event has been processed, with its success.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// A unit of work for the consumer loop. Consumed exactly once.
pub struct Event {
    pub kind: EventKind,
    pub payload: Map<String, Value>,
    callback: Option<CompletionCallback>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            payload: Map::new(),
            callback: None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn with_callback(mut self, callback: impl FnOnce(bool) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Run the completion callback, if any.
    pub fn complete(&mut self, success: bool) {
        if let Some(callback) = self.callback.take() {
            callback(success);
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// FIFO event queue behind one lock.
///
/// Cloning yields another handle to the same queue; the configuration server
/// thread holds one to raise events.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_event(&self, event: Event) {
        self.lock().push_back(event);
    }

    /// Take the oldest event. The lock is released before returning.
    pub fn pop(&self) -> Option<Event> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every queued event, completing each as failed.
    pub fn clear(&self) {
        let drained: Vec<Event> = self.lock().drain(..).collect();
        for mut event in drained {
            event.complete(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.add_event(Event::new(EventKind::TestConnection));
        queue.add_event(Event::new(EventKind::PrintTime));
        queue.add_event(Event::new(EventKind::GoToSleep));

        let kinds: Vec<EventKind> = std::iter::from_fn(|| queue.pop()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::TestConnection, EventKind::PrintTime, EventKind::GoToSleep]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_add_from_other_thread() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        thread::spawn(move || {
            producer.add_event(Event::new(EventKind::GoToSleep).with("sleep_ms", 10));
        })
        .join()
        .unwrap();

        let event = queue.pop().unwrap();
        assert_eq!(event.kind, EventKind::GoToSleep);
        assert_eq!(event.payload["sleep_ms"], 10);
    }

    #[test]
    fn test_callback_runs_once() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let mut event = Event::new(EventKind::PrintTime).with_callback(move |ok| {
            assert!(ok);
            flag.store(true, Ordering::SeqCst);
        });

        event.complete(true);
        event.complete(false);
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clear_fails_pending_events() {
        let queue = EventQueue::new();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        queue.add_event(
            Event::new(EventKind::PublishData).with_callback(move |ok| *slot.lock().unwrap() = Some(ok)),
        );

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(*outcome.lock().unwrap(), Some(false));
    }
}
