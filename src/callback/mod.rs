//! Callback registry: the runtime-mutable table of per-definition handlers.
mod registry;
pub use registry::*;


use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::CallbackError;
use crate::ResourceDefinition;

/// Handler invoked with the latest mirrored copy of a changed definition.
///
/// Returning an error requeues the definition with backoff.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DefinitionCallback: Send + Sync + 'static {
    async fn on_change(
        &self,
        definition: Arc<ResourceDefinition>,
    ) -> Result<(), CallbackError>;
}

/// Async closures are callbacks
#[async_trait]
impl<F, Fut> DefinitionCallback for F
where
    F: Fn(Arc<ResourceDefinition>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    async fn on_change(
        &self,
        definition: Arc<ResourceDefinition>,
    ) -> Result<(), CallbackError> {
        (self)(definition).await
    }
}
