//! Best-effort fan-out to live subscribers.
//!
//! Each subscriber is isolated: an error or a panic in one is logged and the
//! rest still receive the event. Publishing never fails.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::warn;

pub type SubscriberResult = Result<(), String>;

type Callback<T> = Box<dyn Fn(&T) -> SubscriberResult + Send + Sync>;

struct Subscriber<T> {
    name: String,
    callback: Callback<T>,
}

/// Marker a subscriber returns once its consumer is gone; it is then dropped.
pub const CLOSED: &str = "subscriber closed";

pub struct Fanout<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fanout<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&T) -> SubscriberResult + Send + Sync + 'static,
    {
        self.subscribers.push(Subscriber {
            name: name.into(),
            callback: Box::new(callback),
        });
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    pub fn publish(&mut self, event: &T) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|sub| {
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(event))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    true
                }
                Ok(Err(e)) if e == CLOSED => false,
                Ok(Err(e)) => {
                    warn!(subscriber = %sub.name, error = %e, "subscriber failed");
                    true
                }
                Err(_) => {
                    warn!(subscriber = %sub.name, "subscriber panicked");
                    true
                }
            }
        });
        delivered
    }
}

impl<T: Clone + Send + 'static> Fanout<T> {
    /// Stream events into a channel; the subscription ends when the receiver drops.
    pub fn subscribe_channel(&mut self, name: impl Into<String>) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(name, move |event: &T| {
            tx.send(event.clone()).map_err(|_| CLOSED.to_string())
        });
        rx
    }
}
