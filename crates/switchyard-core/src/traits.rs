use async_trait::async_trait;

use crate::{InvokeRequest, InvokeResponse, Result};

/// Trait for backend adapters that can serve normalized inference calls.
///
/// Every registered backend, self-hosted or remote, is addressed through this
/// single interface; adding a backend is a registration, not a code branch in
/// the routing policy.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Returns the human-readable name of this adapter.
    fn name(&self) -> &str;

    /// Checks whether this backend is currently reachable and configured.
    async fn is_available(&self) -> bool;

    /// Serves one normalized call.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable, rejects the request,
    /// or returns a response that cannot be interpreted. Timeouts are
    /// enforced by the caller, not the adapter.
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse>;
}
