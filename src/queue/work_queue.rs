use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::QueueKey;
use super::RateLimiter;
use crate::metrics::QUEUE_ADDS;
use crate::metrics::QUEUE_DEPTH;
use crate::metrics::QUEUE_RETRIES;

struct QueueState<K> {
    /// Keys ready to be handed out, in insertion order
    queue: VecDeque<K>,
    /// Keys that need processing: queued, or re-added while processing
    dirty: HashSet<K>,
    /// Keys handed out by `get` and not yet `done`
    processing: HashSet<K>,
    shutting_down: bool,
}

struct QueueInner<K> {
    name: &'static str,
    state: Mutex<QueueState<K>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
    /// Cancels pending delayed adds on shutdown
    delayed: CancellationToken,
}

/// Deduplicating, rate-limited work queue.
///
/// - A key is present at most once in the queue; adding a queued key is a no-op.
/// - A key handed out by `get` is never handed out again before `done`; adding
///   it meanwhile marks it dirty and it is re-queued by `done`.
/// - After `shutdown`, `get` keeps returning queued keys and returns `None`
///   once the queue is empty.
///
/// Cloning yields another handle on the same queue.
pub struct RateLimitingQueue<K> {
    inner: Arc<QueueInner<K>>,
}

impl<K> Clone for RateLimitingQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: QueueKey> RateLimitingQueue<K> {
    /// `name` labels the queue metrics
    pub fn new(
        name: &'static str,
        rate_limiter: impl RateLimiter<K>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
                delayed: CancellationToken::new(),
            }),
        }
    }

    /// Marks `key` as needing processing
    pub fn add(
        &self,
        key: K,
    ) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(queue = self.inner.name, ?key, "key already pending");
            return;
        }
        QUEUE_ADDS.with_label_values(&[self.inner.name]).inc();
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        QUEUE_DEPTH
            .with_label_values(&[self.inner.name])
            .set(state.queue.len() as i64);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Registered before inspecting the state so a concurrent add or
            // shutdown cannot slip between the check and the wait.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    QUEUE_DEPTH
                        .with_label_values(&[self.inner.name])
                        .set(state.queue.len() as i64);
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Ends the processing of `key`; re-queues it if it was added meanwhile
    pub fn done(
        &self,
        key: &K,
    ) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            QUEUE_DEPTH
                .with_label_values(&[self.inner.name])
                .set(state.queue.len() as i64);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Adds `key` once `delay` has elapsed
    pub fn add_after(
        &self,
        key: K,
        delay: Duration,
    ) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let cancelled = self.inner.delayed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Re-adds `key` after the delay chosen by the rate limiter
    pub fn add_rate_limited(
        &self,
        key: K,
    ) {
        let delay = self.inner.rate_limiter.when(&key);
        QUEUE_RETRIES.with_label_values(&[self.inner.name]).inc();
        trace!(queue = self.inner.name, ?key, ?delay, "rate limited requeue");
        self.add_after(key, delay);
    }

    /// Resets the backoff of `key`
    pub fn forget(
        &self,
        key: &K,
    ) {
        self.inner.rate_limiter.forget(key);
    }

    pub fn num_requeues(
        &self,
        key: &K,
    ) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting keys and releases idle `get` callers once drained
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.delayed.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

impl<K: QueueKey> std::fmt::Debug for RateLimitingQueue<K> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RateLimitingQueue")
            .field("name", &self.inner.name)
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}
