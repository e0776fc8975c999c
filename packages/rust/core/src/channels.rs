//! Registry of live run channels, owned by the serving layer.
//!
//! Every streaming request opens a channel under a run id and removes it when
//! the stream ends. Entries whose stream was never drained are reaped by age.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::events::{self, EventSender, EventStream};

struct Entry {
    sender: EventSender,
    producer: Option<AbortHandle>,
    opened_at: Instant,
}

impl Entry {
    fn shut_down(&self) {
        if let Some(producer) = &self.producer {
            producer.abort();
        }
        self.sender.close();
    }
}

/// Live channels keyed by run id.
#[derive(Default)]
pub struct ChannelRegistry {
    entries: DashMap<String, Entry>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `run_id`, replacing (and shutting down) any previous one.
    pub fn open(&self, run_id: &str) -> (EventSender, EventStream) {
        let (sender, stream) = events::channel();
        let previous = self.entries.insert(
            run_id.to_string(),
            Entry {
                sender: sender.clone(),
                producer: None,
                opened_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            previous.shut_down();
        }
        debug!(run_id, "opened event channel");
        (sender, stream)
    }

    /// Record the task producing events for `run_id` so removal can cancel it.
    pub fn attach(&self, run_id: &str, producer: AbortHandle) {
        match self.entries.get_mut(run_id) {
            Some(mut entry) => entry.producer = Some(producer),
            // Already removed: the consumer is gone, so stop the producer too.
            None => producer.abort(),
        }
    }

    /// Close the channel, cancel its producer, and forget it.
    /// Returns whether the run id was registered.
    pub fn remove(&self, run_id: &str) -> bool {
        match self.entries.remove(run_id) {
            Some((_, entry)) => {
                entry.shut_down();
                debug!(run_id, "removed event channel");
                true
            }
            None => false,
        }
    }

    /// Remove every channel older than `max_age`. Returns how many were reaped.
    pub fn reap(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|run_id, entry| {
            let keep = entry.opened_at.elapsed() <= max_age;
            if !keep {
                info!(run_id = %run_id, "reaping abandoned event channel");
                entry.shut_down();
            }
            keep
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.entries.contains_key(run_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
