//! BoxProviderAdapter -- object-safe dynamic dispatch wrapper for ProviderAdapter.
//!
//! Same blanket-impl pattern as `BoxResponseCache`:
//! 1. Define an object-safe `ProviderAdapterDyn` trait with boxed futures
//! 2. Blanket-impl `ProviderAdapterDyn` for all `T: ProviderAdapter`
//! 3. `BoxProviderAdapter` wraps `Box<dyn ProviderAdapterDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use ideaforge_types::provider::{Generation, HealthReport, ModelConfig, ProviderError, ProviderKind};
use ideaforge_types::request::RouterRequest;

use super::adapter::ProviderAdapter;

/// Object-safe version of [`ProviderAdapter`] with boxed futures.
pub trait ProviderAdapterDyn: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a RouterRequest,
        model: &'a ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Generation, ProviderError>> + Send + 'a>>;

    fn estimate_cost(&self, request: &RouterRequest, model: &ModelConfig) -> f64;

    fn health_check_boxed<'a>(
        &'a self,
        model: &'a ModelConfig,
    ) -> Pin<Box<dyn Future<Output = HealthReport> + Send + 'a>>;
}

impl<T: ProviderAdapter> ProviderAdapterDyn for T {
    fn kind(&self) -> ProviderKind {
        ProviderAdapter::kind(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a RouterRequest,
        model: &'a ModelConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Generation, ProviderError>> + Send + 'a>> {
        Box::pin(self.generate(request, model))
    }

    fn estimate_cost(&self, request: &RouterRequest, model: &ModelConfig) -> f64 {
        ProviderAdapter::estimate_cost(self, request, model)
    }

    fn health_check_boxed<'a>(
        &'a self,
        model: &'a ModelConfig,
    ) -> Pin<Box<dyn Future<Output = HealthReport> + Send + 'a>> {
        Box::pin(self.health_check(model))
    }
}

/// Type-erased provider adapter for runtime provider selection.
///
/// Since `ProviderAdapter` uses RPITIT, it cannot be used as a trait object
/// directly; this wrapper exposes the same methods over `dyn ProviderAdapterDyn`.
pub struct BoxProviderAdapter {
    inner: Box<dyn ProviderAdapterDyn + Send + Sync>,
}

impl BoxProviderAdapter {
    /// Wrap a concrete adapter in a type-erased box.
    pub fn new<T: ProviderAdapter + 'static>(adapter: T) -> Self {
        Self {
            inner: Box::new(adapter),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    pub async fn generate(
        &self,
        request: &RouterRequest,
        model: &ModelConfig,
    ) -> Result<Generation, ProviderError> {
        self.inner.generate_boxed(request, model).await
    }

    pub fn estimate_cost(&self, request: &RouterRequest, model: &ModelConfig) -> f64 {
        self.inner.estimate_cost(request, model)
    }

    pub async fn health_check(&self, model: &ModelConfig) -> HealthReport {
        self.inner.health_check_boxed(model).await
    }
}

impl std::fmt::Debug for BoxProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxProviderAdapter")
            .field("kind", &self.kind())
            .finish()
    }
}
