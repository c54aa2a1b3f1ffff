//! Resource definitions mirrored from the cluster-state store.
mod definition;
mod gvr;
pub use definition::*;
pub use gvr::*;
