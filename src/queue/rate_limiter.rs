use std::marker::PhantomData;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::QueueKey;
use crate::config::exponential_delay_ms;
use crate::QueueConfig;

/// Decides how long a key waits before being re-queued after a failure
pub trait RateLimiter<K>: Send + Sync + 'static {
    /// Delay for the next retry of `key`; records the attempt
    fn when(
        &self,
        key: &K,
    ) -> Duration;

    /// Stops tracking `key`, resetting its backoff
    fn forget(
        &self,
        key: &K,
    );

    /// Failures recorded for `key` since the last `forget`
    fn num_requeues(
        &self,
        key: &K,
    ) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
pub struct ItemExponentialFailureRateLimiter<K: QueueKey> {
    failures: DashMap<K, u32>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl<K: QueueKey> ItemExponentialFailureRateLimiter<K> {
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            failures: DashMap::new(),
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for ItemExponentialFailureRateLimiter<K> {
    fn when(
        &self,
        key: &K,
    ) -> Duration {
        let mut count = self.failures.entry(key.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);
        Duration::from_millis(exponential_delay_ms(
            self.base_delay_ms,
            self.max_delay_ms,
            exp,
        ))
    }

    fn forget(
        &self,
        key: &K,
    ) {
        self.failures.remove(key);
    }

    fn num_requeues(
        &self,
        key: &K,
    ) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by every key.
///
/// Each `when` reserves one token; once the bucket is empty the returned
/// delay is the time until the reservation is covered by the refill rate.
pub struct BucketRateLimiter<K> {
    bucket: Mutex<Bucket>,
    qps: f64,
    burst: f64,
    _key: PhantomData<fn(&K)>,
}

impl<K> BucketRateLimiter<K> {
    pub fn new(
        qps: f64,
        burst: u32,
    ) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: Instant::now(),
            }),
            qps,
            burst: burst as f64,
            _key: PhantomData,
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for BucketRateLimiter<K> {
    fn when(
        &self,
        _key: &K,
    ) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;

        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // A non-positive rate never refills the bucket
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    fn forget(
        &self,
        _key: &K,
    ) {
    }

    fn num_requeues(
        &self,
        _key: &K,
    ) -> u32 {
        0
    }
}

/// Combines limiters, applying the longest delay any of them asks for
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K: QueueKey> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K: QueueKey> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(
        &self,
        key: &K,
    ) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(
        &self,
        key: &K,
    ) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(
        &self,
        key: &K,
    ) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall token bucket
pub fn default_controller_rate_limiter<K: QueueKey>(config: &QueueConfig) -> MaxOfRateLimiter<K> {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        )),
        Box::new(BucketRateLimiter::new(config.qps, config.burst)),
    ])
}
