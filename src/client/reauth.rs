//! Re-authentication and retry.
//!
//! Per call:
//!
//! 1. fold the trace id into the outbound header and the trace scope; with no
//!    scope open, an id already on the request is kept
//! 2. invoke; transport faults fail the call as they are
//! 3. on an HTTP error carrying a session token, ask the re-authenticator for
//!    a new token; if it refuses, the call fails with its original error, and
//!    if an identity service was unreachable, with that connectivity error;
//!    otherwise the request is re-sent exactly once with the new token and
//!    that result is returned whatever it is
//!
//! There is no path on which a call re-authenticates twice.

use crate::auth::traits::SessionReAuthenticator;
use crate::client::http_client::{
    ApiRequest, ApiResponse, HttpApiClient, KEY_MANAGER_TOKEN_HEADER, SESSION_TOKEN_HEADER,
};
use crate::error::{Error, Result};
use crate::logging::{self, TRACE_ID_HEADER};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retries a call once after re-authenticating its principal.
pub struct ReAuthenticatingClient {
    inner: Arc<dyn HttpApiClient>,
    reauth: Arc<dyn SessionReAuthenticator>,
}

impl ReAuthenticatingClient {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn HttpApiClient>, reauth: Arc<dyn SessionReAuthenticator>) -> Self {
        Self { inner, reauth }
    }
}

#[async_trait]
impl HttpApiClient for ReAuthenticatingClient {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        // Outside a scope an id already on the request was folded by an outer layer
        let trace_id = match (logging::current_trace_id(), request.header(TRACE_ID_HEADER)) {
            (None, Some(header)) => header.to_string(),
            _ => logging::propagate(request.header(TRACE_ID_HEADER)),
        };
        request.set_header(TRACE_ID_HEADER, trace_id);

        let cause = match self.inner.invoke(request).await {
            Err(cause @ Error::Api { .. }) => cause,
            other => return other,
        };
        let Some(status) = cause.status() else {
            return Err(cause);
        };
        let Some(session_token) = request.session_token().map(str::to_owned) else {
            return Err(cause);
        };

        let token = match self
            .reauth
            .re_auth_session_or_throw(&session_token, status, cause)
            .await
        {
            Ok(token) => token,
            Err(Error::UnexpectedAuth { message, source }) => {
                warn!(path = %request.path, status, reason = %message, "Re-authentication refused");
                return Err(*source);
            },
            Err(e) => return Err(e),
        };

        debug!(path = %request.path, status, "Retrying with refreshed session");
        request.set_header(SESSION_TOKEN_HEADER, token.session_token());
        if request.has_header(KEY_MANAGER_TOKEN_HEADER) {
            request.set_header(KEY_MANAGER_TOKEN_HEADER, token.key_manager_token());
        }
        self.inner.invoke(request).await
    }
}
