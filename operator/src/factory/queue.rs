use super::QueueKey;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// First retry delay for a failing key.
const BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on the retry delay, no matter how often a key failed.
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Deduplicating work queue with per-key exponential retry backoff.
///
/// A key enqueued while already waiting is dropped, which is what makes a
/// storm of informer notifications collapse into a single reconcile.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<QueueKey>,
    queued: HashSet<QueueKey>,
    failures: HashMap<QueueKey, u32>,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(WorkQueue {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueues the key unless it is already waiting.
    pub fn add(&self, key: QueueKey) {
        let mut inner = self.inner.lock().expect("work queue lock");
        if inner.queued.insert(key.clone()) {
            inner.pending.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Records a failed sync and returns the delay before the next retry:
    /// full jitter over an exponential bound, so lockstep retries across
    /// controllers do not hammer the API server.
    pub fn note_failure(&self, key: &QueueKey) -> Duration {
        let attempts = {
            let mut inner = self.inner.lock().expect("work queue lock");
            let entry = inner.failures.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let exp = attempts.saturating_sub(1).min(27);
        let bound = BASE_DELAY.saturating_mul(1u32 << exp).min(MAX_DELAY);
        let millis = rand::rng().random_range(0..=bound.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Clears the failure history after a successful sync.
    pub fn forget(&self, key: &QueueKey) {
        self.inner
            .lock()
            .expect("work queue lock")
            .failures
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("work queue lock").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for and takes the next key.
    pub async fn take(&self) -> QueueKey {
        loop {
            {
                let mut inner = self.inner.lock().expect("work queue lock");
                if let Some(key) = inner.pending.pop_front() {
                    inner.queued.remove(&key);
                    if !inner.pending.is_empty() {
                        // Notify stores a single permit; hand the remainder
                        // to the next waiting worker.
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Re-enqueues the key after `delay`.
    pub fn requeue_after(self: &Arc<Self>, key: QueueKey, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }
}
