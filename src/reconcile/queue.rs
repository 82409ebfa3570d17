//! # Work queue keyed by instance identity.
//!
//! The queue guarantees **at most one in-flight reconcile per key** while
//! distinct keys run concurrently across the worker pool. It is the
//! standard dirty/processing discipline:
//!
//! ```text
//! add(k):  already dirty? drop.
//!          mark dirty; if k is processing, hold it back;
//!          otherwise enqueue and wake one worker.
//! get():   pop the oldest key, clear dirty, mark processing.
//! done(k): clear processing; if k was dirtied while processing,
//!          enqueue it again.
//! ```
//!
//! ## Rules
//! - A key never occupies more than one queue slot.
//! - A key re-added mid-reconcile runs again immediately after `done`.
//! - `add_after` is fire-and-forget; delayed adds land through `add`
//!   and collapse with any adds that happened in between.
//! - `shut_down` drains waiters; `get` returns `None` once the queue is
//!   both shut down and empty of ready keys.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::fault::InstanceKey;

#[derive(Default)]
struct State {
    queue: VecDeque<InstanceKey>,
    dirty: HashSet<InstanceKey>,
    processing: HashSet<InstanceKey>,
    shutdown: bool,
}

/// Reconcile queue with per-key exclusivity.
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        })
    }

    /// Requests a reconcile for the key.
    pub fn add(&self, key: InstanceKey) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.shutdown || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            // Held back; `done` will requeue it.
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Requests a reconcile after a delay.
    pub fn add_after(self: &Arc<Self>, key: InstanceKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Hands out the next key, waiting if none is ready.
    ///
    /// Returns `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<InstanceKey> {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks a reconcile finished; requeues the key if it was dirtied
    /// while in flight.
    pub fn done(&self, key: &InstanceKey) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys; pending waiters wake with `None`.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.shutdown = true;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently being reconciled.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .expect("queue lock poisoned")
            .processing
            .len()
    }
}
