//! # Supervisor: the reconcile runtime.
//!
//! Owns the work queue, the event bus and the reconcilers; spawns the
//! worker pool and handles graceful shutdown.
//!
//! ```text
//! enqueue(key) ─► WorkQueue ─► worker 1..N ─► Dispatcher::reconcile(key)
//!                                   │
//!                                   ├─ Ok(Done)            ─► nothing
//!                                   ├─ Ok(Requeue)         ─► add(key)
//!                                   ├─ Ok(RequeueAfter(d)) ─► add_after(key, d)
//!                                   ├─ Err(retryable)      ─► add_after(key, backoff(attempt))
//!                                   └─ Err(hard)           ─► log, give up
//!
//! Shutdown:
//!   signal / token ─► publish ShutdownRequested
//!                 ─► queue.shut_down()  (workers drain and exit)
//!                 ─► wait up to grace ─► AllStoppedWithin | GraceExceeded
//! ```
//!
//! ## Rules
//! - At most one reconcile per key at a time (queue discipline); distinct
//!   keys run concurrently across the pool.
//! - The backoff attempt counter is per key and resets on the first
//!   successful reconcile.
//! - Events are fanned out to subscribers from a single listener task;
//!   publishing never blocks a worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::fault::InstanceKey;
use crate::kinds::KindRegistry;
use crate::recover::RecoveryCoordinator;
use crate::reconcile::{Dispatcher, LifecycleReconciler, Outcome, ScheduledReconciler, WorkQueue};
use crate::runtime::shutdown;
use crate::store::InstanceStore;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::target::TargetSelector;

/// Orchestrates reconcile workers, event delivery and shutdown.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    queue: Arc<WorkQueue>,
    dispatcher: Arc<Dispatcher>,
    subscribers: Arc<SubscriberSet>,
    attempts: Arc<Mutex<HashMap<InstanceKey, u32>>>,
}

impl Supervisor {
    /// Wires the runtime: registry, selector and store come from the
    /// embedding application, everything else is built here.
    pub fn new(
        cfg: Config,
        registry: Arc<KindRegistry>,
        selector: Arc<dyn TargetSelector>,
        store: Arc<dyn InstanceStore>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let recovery = Arc::new(RecoveryCoordinator::new(
            registry.clone(),
            selector.clone(),
            bus.clone(),
            cfg.rpc_timeout,
        ));
        let lifecycle = Arc::new(LifecycleReconciler::new(
            registry,
            selector,
            store.clone(),
            recovery.clone(),
            bus.clone(),
            &cfg,
        ));
        let scheduled = Arc::new(ScheduledReconciler::new(
            store.clone(),
            recovery,
            lifecycle.clone(),
            bus.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(store, lifecycle, scheduled));

        Self {
            cfg,
            bus,
            queue: WorkQueue::new(),
            dispatcher,
            subscribers: Arc::new(SubscriberSet::new(subscribers)),
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The runtime's event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The work queue, for watch layers that enqueue keys directly.
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Requests a reconcile for the key.
    pub fn enqueue(&self, key: InstanceKey) {
        self.queue.add(key);
    }

    /// Runs until an OS termination signal arrives.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let token = CancellationToken::new();
        let signal_token = token.clone();
        tokio::spawn(async move {
            if shutdown::wait_for_shutdown_signal().await.is_err() {
                warn!("failed to register signal handlers");
            }
            signal_token.cancel();
        });
        self.run_until(token).await
    }

    /// Runs until the token is cancelled. Embedding applications and
    /// tests drive shutdown through this.
    pub async fn run_until(&self, token: CancellationToken) -> Result<(), RuntimeError> {
        self.spawn_subscriber_listener();

        let mut workers = JoinSet::new();
        for id in 0..self.cfg.workers_clamped() {
            workers.spawn(Self::worker(
                id,
                self.queue.clone(),
                self.dispatcher.clone(),
                self.bus.clone(),
                self.cfg.clone(),
                self.attempts.clone(),
            ));
        }
        info!(workers = self.cfg.workers_clamped(), "supervisor started");

        token.cancelled().await;
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        self.queue.shut_down();
        self.wait_all_with_grace(&mut workers).await
    }

    /// Forwards bus events to the subscriber set.
    fn spawn_subscriber_listener(&self) {
        if self.subscribers.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => subscribers.emit(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// One reconcile worker: drain the queue until shutdown.
    async fn worker(
        id: usize,
        queue: Arc<WorkQueue>,
        dispatcher: Arc<Dispatcher>,
        bus: Bus,
        cfg: Config,
        attempts: Arc<Mutex<HashMap<InstanceKey, u32>>>,
    ) {
        while let Some(key) = queue.get().await {
            let result = dispatcher.reconcile(&key, Utc::now()).await;
            queue.done(&key);

            match result {
                Ok(outcome) => {
                    attempts.lock().expect("attempts lock poisoned").remove(&key);
                    match outcome {
                        Outcome::Done => {}
                        Outcome::Requeue => queue.add(key),
                        Outcome::RequeueAfter(delay) => queue.add_after(key, delay),
                    }
                }
                Err(err) if err.is_retryable() => {
                    let attempt = {
                        let mut attempts = attempts.lock().expect("attempts lock poisoned");
                        let counter = attempts.entry(key.clone()).or_insert(0);
                        *counter += 1;
                        *counter
                    };
                    let delay = cfg.requeue.next(attempt - 1);
                    warn!(
                        worker = id,
                        instance = %key,
                        attempt,
                        ?delay,
                        error = %err,
                        "reconcile failed, requeueing with backoff"
                    );
                    bus.publish(
                        Event::now(EventKind::ReconcileRequeued)
                            .with_instance(key.to_string())
                            .with_delay(delay)
                            .with_attempt(attempt)
                            .with_error(err.to_string()),
                    );
                    queue.add_after(key, delay);
                }
                Err(err) => {
                    attempts.lock().expect("attempts lock poisoned").remove(&key);
                    error!(
                        worker = id,
                        instance = %key,
                        label = err.as_label(),
                        error = %err,
                        "reconcile failed with a non-retryable error, giving up"
                    );
                }
            }
        }
    }

    /// Waits for workers to drain within the grace period.
    async fn wait_all_with_grace(
        &self,
        workers: &mut JoinSet<()>,
    ) -> Result<(), RuntimeError> {
        let drain = async { while workers.join_next().await.is_some() {} };
        match tokio::time::timeout(self.cfg.grace, drain).await {
            Ok(()) => {
                self.bus.publish(Event::now(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                Err(RuntimeError::GraceExceeded {
                    grace: self.cfg.grace,
                    pending: self.queue.in_flight(),
                })
            }
        }
    }
}
