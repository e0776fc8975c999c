//! Per-run progress events and the channel that carries them.
//!
//! The producer side ([`EventSender`]) never blocks: the queue is unbounded
//! and a run emits a bounded number of events. Closing the channel drops the
//! underlying sender, which wakes a waiting [`EventStream`] immediately once
//! the queued events are drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Token,
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Token => "token",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    /// Result and error end a run's stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Result | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Payload,
}

impl Event {
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Status,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn token(text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Token,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn result(value: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Result,
            payload: Payload::Json(value),
        }
    }

    pub fn error(value: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Error,
            payload: Payload::Json(value),
        }
    }

    /// The payload text, if this is a text event.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            Payload::Json(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// Where a run reports progress. Emitting never fails and never blocks.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// No-op sink for headless/test usage.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn emit(&self, _event: Event) {}
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

struct Shared {
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    closed: AtomicBool,
}

/// Producer half of a run's event channel. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

/// Consumer half of a run's event channel.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

/// Outcome of one bounded wait on an [`EventStream`].
#[derive(Debug, PartialEq)]
pub enum Delivery {
    Event(Event),
    /// Nothing arrived within the wait.
    Idle,
    /// The channel is closed and fully drained.
    Closed,
}

/// Open a fresh event channel.
pub fn channel() -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = EventSender {
        shared: Arc::new(Shared {
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }),
    };
    (sender, EventStream { rx })
}

impl EventSender {
    /// Enqueue an event. Returns `false` and discards it if the channel is
    /// closed or the consumer has gone away.
    pub fn send(&self, event: Event) -> bool {
        let guard = self.shared.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn status(&self, text: impl Into<String>) -> bool {
        self.send(Event::status(text))
    }

    /// Close the channel. Idempotent. Already queued events stay deliverable.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.tx.lock().take();
    }

    /// True once closed, or once the consumer has dropped its stream.
    pub fn is_closed(&self) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return true;
        }
        self.shared
            .tx
            .lock()
            .as_ref()
            .is_none_or(mpsc::UnboundedSender::is_closed)
    }
}

impl ProgressSink for EventSender {
    fn emit(&self, event: Event) {
        self.send(event);
    }
}

impl EventStream {
    /// Wait up to `wait` for the next event.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Delivery {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(event)) => Delivery::Event(event),
            Ok(None) => Delivery::Closed,
            Err(_) => Delivery::Idle,
        }
    }

    /// Wait for the next event; `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
