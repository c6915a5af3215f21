//! Assembly of API client chains.
//!
//! A chain is built once per upstream service and shared by every call. From
//! the wire outwards the layers are:
//!
//! 1. [`ReqwestApiClient`] puts the request on the principal's transport
//! 2. [`AuthHeaderInjector`] attaches the principal's tokens
//! 3. [`ConnectivityTranslator`] attributes transport faults to the service
//! 4. [`ReAuthenticatingClient`] re-authenticates once on `401`
//! 5. [`TraceLoggingClient`] propagates the trace id and logs the call
//! 6. [`MetricsClient`] counts the call
//!
//! Chains for the identity services skip layers 2 and 4: a login call cannot
//! log itself in.
//!
//! # Examples
//!
//! ```rust,no_run
//! use integration_auth::client::chain::ApiClientChainBuilder;
//! use integration_auth::client::metrics::ApiMetrics;
//! use integration_auth::{AuthenticationProxy, GatewayConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> integration_auth::Result<()> {
//! let config = GatewayConfig::load()?;
//! let metrics = Arc::new(ApiMetrics::new());
//! let proxy = Arc::new(AuthenticationProxy::from_config(&config, metrics.clone())?);
//! let pod = ApiClientChainBuilder::for_service("pod", proxy, metrics)?;
//! # Ok(())
//! # }
//! ```

use crate::auth::proxy::AuthenticationProxy;
use crate::auth::traits::{SessionReAuthenticator, TokenProvider, TransportProvider};
use crate::client::auth_header::AuthHeaderInjector;
use crate::client::connectivity::ConnectivityTranslator;
use crate::client::http_client::{HttpApiClient, ReqwestApiClient};
use crate::client::metrics::{ApiMetrics, MetricsClient};
use crate::client::reauth::ReAuthenticatingClient;
use crate::client::trace_logging::TraceLoggingClient;
use crate::error::{Result, ServiceKind};
use std::sync::Arc;

/// Wraps a base client layer by layer, innermost first.
pub struct ApiClientChainBuilder {
    service: String,
    client: Arc<dyn HttpApiClient>,
    layers: Vec<&'static str>,
}

impl ApiClientChainBuilder {
    /// Start from an arbitrary base client.
    pub fn new(service: impl Into<String>, base: Arc<dyn HttpApiClient>) -> Self {
        Self {
            service: service.into(),
            client: base,
            layers: vec!["base"],
        }
    }

    /// Start from a [`ReqwestApiClient`] for `service`.
    pub fn reqwest(service: impl Into<String>, transports: Arc<dyn TransportProvider>) -> Self {
        let service = service.into();
        let base = Arc::new(ReqwestApiClient::new(service.clone(), transports));
        Self::new(service, base)
    }

    /// Attach tokens for the request's principal.
    pub fn with_auth_headers(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.client = Arc::new(AuthHeaderInjector::new(self.client, tokens));
        self.layers.push("auth_header");
        self
    }

    /// Translate transport faults into connectivity errors for `service`.
    pub fn with_connectivity(mut self, service: ServiceKind) -> Self {
        self.client = Arc::new(ConnectivityTranslator::new(self.client, service));
        self.layers.push("connectivity");
        self
    }

    /// Re-authenticate and retry once on `401`.
    pub fn with_reauthentication(mut self, reauth: Arc<dyn SessionReAuthenticator>) -> Self {
        self.client = Arc::new(ReAuthenticatingClient::new(self.client, reauth));
        self.layers.push("reauth");
        self
    }

    /// Propagate the trace id and log calls.
    pub fn with_trace_logging(mut self) -> Self {
        let layer = TraceLoggingClient::new(self.client, self.service.clone());
        self.client = Arc::new(layer);
        self.layers.push("trace_logging");
        self
    }

    /// Count calls.
    pub fn with_metrics(mut self, metrics: Arc<ApiMetrics>) -> Self {
        self.client = Arc::new(MetricsClient::new(self.client, metrics));
        self.layers.push("metrics");
        self
    }

    /// Layer names, innermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    /// Finish the chain.
    pub fn build(self) -> Arc<dyn HttpApiClient> {
        tracing::debug!(service = %self.service, layers = ?self.layers, "Built API client chain");
        self.client
    }

    /// Full chain for a downstream service.
    ///
    /// Fails with [`Error::ServiceUrlNotFound`](crate::Error::ServiceUrlNotFound)
    /// when `service` has no configured base URL, so a misconfigured service is
    /// reported at startup rather than on its first call.
    pub fn for_service(
        service: &str,
        proxy: Arc<AuthenticationProxy>,
        metrics: Arc<ApiMetrics>,
    ) -> Result<Arc<dyn HttpApiClient>> {
        proxy.registry().services().resolve(service)?;
        Ok(Self::downstream(service, proxy, metrics).build())
    }

    /// Chain builder for a downstream service over any proxy implementation.
    ///
    /// The service URL is not checked here; it is resolved when a transport is
    /// first built.
    pub fn downstream<P>(service: &str, proxy: Arc<P>, metrics: Arc<ApiMetrics>) -> Self
    where
        P: TransportProvider + TokenProvider + SessionReAuthenticator + 'static,
    {
        Self::reqwest(service, proxy.clone())
            .with_auth_headers(proxy.clone())
            .with_connectivity(ServiceKind::Downstream(service.to_string()))
            .with_reauthentication(proxy)
            .with_trace_logging()
            .with_metrics(metrics)
    }

    /// Chain for one of the identity services.
    pub fn for_authentication_service(
        service: &str,
        kind: ServiceKind,
        transports: Arc<dyn TransportProvider>,
        metrics: Arc<ApiMetrics>,
    ) -> Arc<dyn HttpApiClient> {
        Self::reqwest(service, transports)
            .with_connectivity(kind)
            .with_trace_logging()
            .with_metrics(metrics)
            .build()
    }
}
