use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::Event;

/// Per-subscriber queue depth. A subscriber that falls this far behind
/// starts losing events rather than stalling producers.
const SUBSCRIBER_BUFFER: usize = 64;

/* ============================= BROADCASTER ============================= */

/// Fan-out of store and remediation events to dashboard subscribers.
///
/// Publishing never blocks: each subscriber gets a bounded queue and a
/// `try_send`; a full queue drops the event with a debug log, a closed
/// queue drops the subscriber. Events from one producer reach a given
/// subscriber in FIFO order; nothing is promised across subscribers.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber. The returned id deregisters it later.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .expect("broadcaster lock not poisoned")
            .insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .write()
            .expect("broadcaster lock not poisoned")
            .remove(&id);
    }

    /// Deliver an event to every live subscriber, best effort.
    pub fn publish(&self, event: &Event) {
        let mut closed = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .expect("broadcaster lock not poisoned");
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(subscriber = id, kind = event.kind(), "subscriber_lagging_event_dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .expect("broadcaster lock not poisoned");
            for id in closed {
                subscribers.remove(&id);
                debug!(subscriber = id, "subscriber_gone_removed");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("broadcaster lock not poisoned")
            .len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/* ============================= TESTS ============================= */
