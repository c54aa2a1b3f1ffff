//! Watches custom resource definitions owned by the orchestrator and invokes
//! a per-definition callback whenever one of them changes.
//!
//! ```text
//!  DefinitionStore ─▶ Informer/ChangeCache ─▶ DedupFilter ─▶ RateLimitingQueue
//!                                                                 │
//!                          CallbackRegistry ◀── DispatchWorker ◀──┘
//! ```
//!
//! [`CrdWatcher`] owns the whole pipeline and exposes the start/stop
//! lifecycle together with callback registration.
mod cache;
mod callback;
mod config;
mod constants;
mod errors;
mod queue;
mod resource;
mod store;
mod watcher;
pub mod metrics;

pub use cache::*;
pub use callback::*;
pub use constants::OWNED_LABEL;
pub use constants::OWNED_LABEL_VALUE;
pub use errors::*;
pub use queue::*;
pub use resource::*;
pub use store::*;
pub use watcher::*;

pub use self::config::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
mod test_utils;
