//! CRD watcher: wires the change cache, dedup filter, retry queue, callback
//! registry and dispatch workers together behind a start/stop lifecycle.
//!
//! ```text
//!  Informer ──on_update──▶ DedupFilter ──add(name)──▶ RateLimitingQueue
//!                                                          │ get
//!                                                          ▼
//!  ChangeCache ◀──get(name)── DispatchWorker ──lookup──▶ CallbackRegistry
//!                                 │ error                  │
//!                                 └── add_rate_limited ◀───┘ on_change
//! ```
mod crd_watcher;
mod dedup;
mod worker;
pub use crd_watcher::*;
pub use dedup::*;
pub(crate) use worker::*;
