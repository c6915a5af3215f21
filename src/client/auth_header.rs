//! Authentication-header injection.

use crate::auth::traits::TokenProvider;
use crate::client::http_client::{
    ApiRequest, ApiResponse, HttpApiClient, KEY_MANAGER_TOKEN_HEADER, SESSION_TOKEN_HEADER,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Adds `sessionToken` and `keyManagerToken` headers for the request's principal.
///
/// Requests that already carry a session token, or name no principal, pass
/// through untouched. A principal that is not yet authenticated is logged in
/// first.
pub struct AuthHeaderInjector {
    inner: Arc<dyn HttpApiClient>,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthHeaderInjector {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn HttpApiClient>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { inner, tokens }
    }
}

#[async_trait]
impl HttpApiClient for AuthHeaderInjector {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        if !request.has_header(SESSION_TOKEN_HEADER) {
            if let Some(principal) = request.principal.clone() {
                let token = self.tokens.ensure_token(&principal).await?;
                request.set_header(SESSION_TOKEN_HEADER, token.session_token());
                if !token.key_manager_token().is_empty() {
                    request.set_header(KEY_MANAGER_TOKEN_HEADER, token.key_manager_token());
                }
                trace!(principal = %principal, "Attached authentication headers");
            }
        }
        self.inner.invoke(request).await
    }
}
