//! Work queue and worker pool driving the reconciler.
//!
//! The queue guarantees that a key is handed to at most one worker at a
//! time. A key added while it is being processed is marked dirty and handed
//! out again once the current pass finishes, so no change is lost and no two
//! passes for the same route overlap.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Action, Reconciler};
use crate::config::Config;
use crate::error::ReconcileError;
use crate::model::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    shutdown: bool,
}

/// Deduplicating FIFO of route keys with per-key exclusivity.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `key` unless it is already waiting. Ignored after shutdown.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller must pass the key to [`WorkQueue::done`] when finished.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_next() {
                return next;
            }
            notified.await;
        }
    }

    fn try_next(&self) -> Option<Option<ObjectKey>> {
        let mut state = self.lock();
        if state.shutdown {
            return Some(None);
        }
        let key = state.pending.pop_front()?;
        state.queued.remove(&key);
        state.processing.insert(key.clone());
        let more = !state.pending.is_empty();
        drop(state);
        if more {
            self.notify.notify_one();
        }
        Some(Some(key))
    }

    /// Releases `key`, requeueing it if it was added while being processed.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys and wakes every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-key exponential backoff with jitter.
///
/// The n-th consecutive failure waits `base * 2^(n-1)`, capped at `max`,
/// with the upper half of that delay randomized.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: DashMap<ObjectKey, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    /// Records a failure for `key` and returns how long to wait before retrying.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let attempt = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };

        let capped = self.ceiling(attempt);
        let half = capped / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(capped - half + jitter)
    }

    /// Upper bound of the delay for the given attempt, in milliseconds.
    fn ceiling(&self, attempt: u32) -> u64 {
        let base = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        base.saturating_mul(factor).min(max)
    }

    /// Clears the failure count after a successful pass.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|n| *n).unwrap_or(0)
    }
}

/// Runs a pool of workers pulling keys from a [`WorkQueue`].
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Backoff>,
    workers: usize,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, config: &Config) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(Backoff::new(config.backoff_base(), config.backoff_max())),
            workers: config.workers.max(1),
        }
    }

    /// Schedules a pass for `key`.
    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn backoff(&self) -> &Arc<Backoff> {
        &self.backoff
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Processes keys until `cancel` fires, then waits for the workers to stop.
    ///
    /// In-flight passes observe the same token and abort at their next store call.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(workers = self.workers, "starting reconcile workers");

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(
                id,
                self.reconciler.clone(),
                self.queue.clone(),
                self.backoff.clone(),
                cancel.clone(),
            ));
        }

        cancel.cancelled().await;
        self.queue.shutdown();
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "reconcile worker panicked");
            }
        }
        info!("reconcile workers stopped");
    }
}

async fn worker(
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Backoff>,
    cancel: CancellationToken,
) {
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            key = queue.next() => match key {
                Some(key) => key,
                None => break,
            },
        };

        debug!(worker = id, source = %key, "picked up key");
        match reconciler.reconcile(&key, &cancel).await {
            Ok(Action::Done) => backoff.forget(&key),
            Ok(Action::Requeue) => requeue_after_backoff(&queue, &backoff, &key, &cancel),
            Err(ReconcileError::Cancelled) => {
                queue.done(&key);
                break;
            }
            Err(err) => {
                warn!(source = %key, error = %err, "reconcile failed");
                requeue_after_backoff(&queue, &backoff, &key, &cancel);
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "worker exiting");
}

fn requeue_after_backoff(
    queue: &Arc<WorkQueue>,
    backoff: &Backoff,
    key: &ObjectKey,
    cancel: &CancellationToken,
) {
    let delay = backoff.next_delay(key);
    debug!(source = %key, ?delay, "requeueing after backoff");

    let queue = queue.clone();
    let key = key.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => queue.add(key),
        }
    });
}
