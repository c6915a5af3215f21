//! Trace propagation and request logging.
//!
//! Header values for tokens are redacted with the helpers in
//! [`shared::http_utils`](crate::shared::http_utils). Bodies are logged only
//! for error responses, only when the base client kept them (text content
//! types), and only up to `max_body_bytes`.

use crate::client::http_client::{ApiRequest, ApiResponse, HttpApiClient};
use crate::error::{Error, Result};
use crate::logging::{self, TRACE_ID_HEADER};
use crate::shared::http_utils::{
    default_sensitive_headers, format_headers_for_logging, truncate_value,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Logs every call inside a span tagged with the service, method, path and trace id.
pub struct TraceLoggingClient {
    inner: Arc<dyn HttpApiClient>,
    service: String,
    redact_headers: HashSet<String>,
    max_body_bytes: Option<usize>,
}

impl TraceLoggingClient {
    /// Wrap `inner` with default redaction and no body logging.
    pub fn new(inner: Arc<dyn HttpApiClient>, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
            redact_headers: default_sensitive_headers(),
            max_body_bytes: None,
        }
    }

    /// Log up to `max_bytes` of error response bodies.
    pub fn with_max_body_bytes(mut self, max_bytes: usize) -> Self {
        self.max_body_bytes = Some(max_bytes);
        self
    }

    /// Redact an additional header.
    pub fn redact_header(mut self, name: &str) -> Self {
        self.redact_headers.insert(name.to_ascii_lowercase());
        self
    }

    fn log_error(&self, error: &Error, elapsed_ms: u128) {
        match error {
            Error::Api { status, body, .. } => {
                let body = self
                    .max_body_bytes
                    .and_then(|max| body.as_deref().map(|b| truncate_value(b, Some(max))));
                warn!(status, elapsed_ms, body = ?body, "API call failed");
            },
            other => warn!(elapsed_ms, error = %other, "API call failed"),
        }
    }
}

#[async_trait]
impl HttpApiClient for TraceLoggingClient {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        let trace_id = logging::propagate(request.header(TRACE_ID_HEADER));
        request.set_header(TRACE_ID_HEADER, trace_id.as_str());

        let span = info_span!(
            "api_call",
            service = %self.service,
            method = %request.method,
            path = %request.path,
            trace_id = %trace_id,
        );

        async {
            debug!(
                headers = %format_headers_for_logging(&request.headers, &self.redact_headers, Some(64)),
                principal = ?request.principal,
                "Sending request"
            );
            let started = Instant::now();
            let result = self.inner.invoke(request).await;
            let elapsed_ms = started.elapsed().as_millis();

            match &result {
                Ok(response) => debug!(status = response.status, elapsed_ms, "API call succeeded"),
                Err(e) => self.log_error(e, elapsed_ms),
            }
            result
        }
        .instrument(span)
        .await
    }
}
