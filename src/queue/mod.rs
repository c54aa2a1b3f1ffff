//! Retry queue: a deduplicating work queue with per-key exponential backoff.
//!
//! ```text
//!  add(key) ──▶ dirty? ──no──▶ queue ──get()──▶ processing ──done(key)──┐
//!                 │yes                                                  │
//!                 └─(coalesced)            re-queued if dirty again ◀───┘
//!
//!  add_rate_limited(key) ── RateLimiter::when(key) ──▶ add_after(key, delay)
//! ```
mod rate_limiter;
mod work_queue;
pub use rate_limiter::*;
pub use work_queue::*;


use std::fmt::Debug;
use std::hash::Hash;

/// Bounds required of queue keys
pub trait QueueKey: Clone + Eq + Hash + Send + Sync + Debug + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + Send + Sync + Debug + 'static {}
