use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;
use tracing::error;

use crate::metrics::DISPATCH_RESULTS;
use crate::CallbackError;
use crate::CallbackRegistry;
use crate::ChangeCache;
use crate::RateLimitingQueue;
use crate::RetryPolicy;

/// Successful ends of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// The callback ran and returned `Ok`
    Invoked,
    /// The definition is gone from the cache
    Missing,
    /// No callback is registered for the definition
    Unregistered,
}

impl DispatchOutcome {
    fn as_label(self) -> &'static str {
        match self {
            DispatchOutcome::Invoked => "success",
            DispatchOutcome::Missing => "missing",
            DispatchOutcome::Unregistered => "unregistered",
        }
    }
}

/// Drains the retry queue and invokes the registered callbacks.
///
/// The only suspension points are the queue's `get` and the callback itself.
pub(crate) struct DispatchWorker {
    id: usize,
    queue: RateLimitingQueue<String>,
    cache: ChangeCache,
    callbacks: Arc<CallbackRegistry>,
    retry: RetryPolicy,
}

impl DispatchWorker {
    pub(crate) fn new(
        id: usize,
        queue: RateLimitingQueue<String>,
        cache: ChangeCache,
        callbacks: Arc<CallbackRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id,
            queue,
            cache,
            callbacks,
            retry,
        }
    }

    /// Processes keys until the queue is shut down and drained
    pub(crate) async fn run(self) {
        debug!(worker = self.id, "CRD dispatch worker started");
        while self.process_next_item().await {}
        debug!(worker = self.id, "CRD dispatch worker stopped");
    }

    /// Handles one key. Returns `false` once the queue is shut down.
    pub(crate) async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.dispatch(&key).await {
            Ok(outcome) => {
                DISPATCH_RESULTS.with_label_values(&[outcome.as_label()]).inc();
                self.queue.forget(&key);
            }
            Err(e) => {
                DISPATCH_RESULTS.with_label_values(&["failure"]).inc();
                let requeues = self.queue.num_requeues(&key);
                if self.retry.allows_retry(requeues) {
                    error!(name = %key, error = %e, requeues, "Error processing CRD");
                    self.queue.add_rate_limited(key.clone());
                } else {
                    error!(name = %key, error = %e, requeues, "Error processing CRD, giving up after max retries");
                    DISPATCH_RESULTS.with_label_values(&["dropped"]).inc();
                    self.queue.forget(&key);
                }
            }
        }

        self.queue.done(&key);
        true
    }

    /// Reads the current state of `key` and runs its callback, if any
    pub(crate) async fn dispatch(
        &self,
        key: &str,
    ) -> Result<DispatchOutcome, CallbackError> {
        let Some(definition) = self.cache.get(key) else {
            debug!(name = %key, "CRD no longer exists");
            return Ok(DispatchOutcome::Missing);
        };

        let Some(callback) = self.callbacks.lookup(key) else {
            return Ok(DispatchOutcome::Unregistered);
        };

        debug!(
            name = %key,
            resource_version = %definition.resource_version(),
            worker = self.id,
            "Calling callback for CRD"
        );
        match AssertUnwindSafe(callback.on_change(definition))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map(|_| DispatchOutcome::Invoked),
            Err(panic) => Err(format!("callback panicked: {}", panic_message(panic.as_ref())).into()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
