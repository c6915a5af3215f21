//! Seams between the authentication proxy and the API client decorators.
//!
//! The decorators depend on these traits rather than on
//! [`AuthenticationProxy`](crate::auth::AuthenticationProxy) directly, which keeps
//! the chain testable with scripted fakes.

use crate::auth::context::HttpTransport;
use crate::auth::token::AuthenticationToken;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Looks up the pooled transport a request should be sent on.
pub trait TransportProvider: Send + Sync {
    /// Transport of the principal `principal_id` for `service`.
    fn transport_for_principal(&self, principal_id: &str, service: &str) -> Result<HttpTransport>;

    /// Transport of the principal owning `session_token` for `service`.
    fn transport_for_session_token(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<HttpTransport>;
}

/// Supplies a valid token for a principal, logging in when needed.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token when authenticated, otherwise the result of a fresh login.
    async fn ensure_token(&self, principal_id: &str) -> Result<AuthenticationToken>;
}

/// Re-authenticates the principal behind a rejected session token.
#[async_trait]
pub trait SessionReAuthenticator: Send + Sync {
    /// Re-authenticate the owner of `session_token` after a call failed with
    /// `status`, returning the token to retry with.
    ///
    /// `cause` is the error of the rejected call. It is returned unchanged for
    /// statuses that are not an authentication signal.
    async fn re_auth_session_or_throw(
        &self,
        session_token: &str,
        status: u16,
        cause: Error,
    ) -> Result<AuthenticationToken>;
}
