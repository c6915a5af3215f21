//! Client side of the identity services' login endpoint.

use crate::auth::token::SessionToken;
use crate::client::http_client::{ApiRequest, HttpApiClient};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Login endpoint path, relative to the service base URL.
pub const AUTHENTICATE_PATH: &str = "/v1/authenticate";

/// Exchanges a principal identifier for a token.
#[async_trait]
pub trait AuthenticationApi: Send + Sync {
    /// Log `principal_id` in and return the issued token.
    async fn authenticate(&self, principal_id: &str) -> Result<SessionToken>;
}

/// [`AuthenticationApi`] over an API client chain.
///
/// The principal is identified by the client certificate of its transport;
/// the request itself carries no body.
pub struct HttpAuthenticationApi {
    client: Arc<dyn HttpApiClient>,
}

impl HttpAuthenticationApi {
    /// Wrap a client chain built for one of the identity services.
    pub fn new(client: Arc<dyn HttpApiClient>) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for HttpAuthenticationApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthenticationApi").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthenticationApi for HttpAuthenticationApi {
    async fn authenticate(&self, principal_id: &str) -> Result<SessionToken> {
        let mut request = ApiRequest::post(AUTHENTICATE_PATH).for_principal(principal_id);
        self.client.invoke(&mut request).await?.json()
    }
}
