//! Connectivity-fault translation.

use crate::client::http_client::{ApiRequest, ApiResponse, HttpApiClient};
use crate::error::{Result, ServiceKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Turns I/O transport faults into [`Error::Connectivity`](crate::Error::Connectivity)
/// for the configured service. Nothing is retried here.
pub struct ConnectivityTranslator {
    inner: Arc<dyn HttpApiClient>,
    service: ServiceKind,
}

impl ConnectivityTranslator {
    /// Wrap `inner`, attributing faults to `service`.
    pub fn new(inner: Arc<dyn HttpApiClient>, service: ServiceKind) -> Self {
        Self { inner, service }
    }
}

#[async_trait]
impl HttpApiClient for ConnectivityTranslator {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        let result = self.inner.invoke(request).await;
        result.map_err(|e| {
            let e = e.into_connectivity(self.service.clone());
            if e.is_connectivity() {
                warn!(service = %self.service, path = %request.path, error = ?e, "Service unreachable");
            }
            e
        })
    }
}
