//! Opaque handle to a configured provider instance
//!
//! The handle is what the engine holds for the duration of a deployment. It
//! enforces the protocol's ordering rules and the caller-side failure policy:
//!
//! - resource-scoped calls before `configure` fail with `NotConfigured`
//! - a transport failure poisons the handle; later calls fail fast
//! - Create/Update/Delete are bounded by their timeout

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::registry::ProviderKey;
use crate::types::{
    CheckRequest, CheckResponse, ConfigureRequest, CreateRequest, CreateResponse, DeleteRequest,
    DiffRequest, DiffResponse, ReadRequest, ReadResponse, UpdateRequest, UpdateResponse,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    key: ProviderKey,
    provider: Arc<dyn Provider>,
    configured: AtomicBool,
    failure: OnceLock<String>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("key", &self.inner.key)
            .field("configured", &self.is_configured())
            .field("failure", &self.inner.failure.get())
            .finish()
    }
}

impl ProviderHandle {
    pub fn new(key: ProviderKey, provider: Arc<dyn Provider>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                key,
                provider,
                configured: AtomicBool::new(false),
                failure: OnceLock::new(),
            }),
        }
    }

    pub fn key(&self) -> &ProviderKey {
        &self.inner.key
    }

    pub fn name(&self) -> &str {
        self.inner.provider.name()
    }

    pub fn version(&self) -> &str {
        self.inner.provider.version()
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.load(Ordering::Acquire)
    }

    /// Transport failure that poisoned this handle, if any
    pub fn failure(&self) -> Option<&str> {
        self.inner.failure.get().map(String::as_str)
    }

    fn ensure_reachable(&self) -> Result<()> {
        match self.inner.failure.get() {
            Some(reason) => Err(ProviderError::Transport(reason.clone())),
            None => Ok(()),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        self.ensure_reachable()?;
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(self.name().to_string()));
        }
        Ok(())
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ProviderError::Transport(reason)) = &result
            && self.inner.failure.set(reason.clone()).is_ok()
        {
            tracing::warn!(
                "Provider {} is unreachable, skipping further calls: {}",
                self.name(),
                reason
            );
        }
        result
    }

    pub async fn check_config(&self, request: CheckRequest) -> Result<CheckResponse> {
        self.ensure_reachable()?;
        let result = self.inner.provider.check_config(request).await;
        self.observe(result)
    }

    pub async fn diff_config(&self, request: DiffRequest) -> Result<DiffResponse> {
        self.ensure_reachable()?;
        let result = self.inner.provider.diff_config(request).await;
        self.observe(result)
    }

    pub async fn configure(&self, request: ConfigureRequest) -> Result<()> {
        self.ensure_reachable()?;
        let result = self.inner.provider.configure(request).await;
        if result.is_ok() {
            self.inner.configured.store(true, Ordering::Release);
        }
        self.observe(result)
    }

    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        self.ensure_ready()?;
        let result = self.inner.provider.check(request).await;
        self.observe(result)
    }

    pub async fn diff(&self, request: DiffRequest) -> Result<DiffResponse> {
        self.ensure_ready()?;
        let result = self.inner.provider.diff(request).await;
        self.observe(result)
    }

    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
        self.ensure_ready()?;
        let timeout = request.timeout;
        let result = bounded(timeout, self.inner.provider.create(request)).await;
        self.observe(result)
    }

    pub async fn read(&self, request: ReadRequest) -> Result<ReadResponse> {
        self.ensure_ready()?;
        let result = self.inner.provider.read(request).await;
        self.observe(result)
    }

    pub async fn update(&self, request: UpdateRequest) -> Result<UpdateResponse> {
        self.ensure_ready()?;
        let timeout = request.timeout;
        let result = bounded(timeout, self.inner.provider.update(request)).await;
        self.observe(result)
    }

    /// Delete carries no timeout on the wire, so the caller supplies one
    pub async fn delete(&self, request: DeleteRequest, timeout: Duration) -> Result<()> {
        self.ensure_ready()?;
        let result = bounded(timeout, self.inner.provider.delete(request)).await;
        self.observe(result)
    }
}

/// Tear the call down after `timeout`; zero means unbounded
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return call.await;
    }
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
}
