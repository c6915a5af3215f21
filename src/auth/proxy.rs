//! Authentication proxy: principal registration, dual-service login and
//! re-authentication arbitration.
//!
//! # Login
//!
//! [`AuthenticationProxy::authenticate`] calls the Session Authentication
//! Service and then the Key Manager Authentication Service. Only when both
//! succeed is the resulting pair assigned to the principal's context. Any
//! failure invalidates the context (history is kept) and is returned to the
//! caller, with transport faults attributed to the service that caused them.
//!
//! # Re-authentication
//!
//! A downstream `401` is the signal to log in again; a `403` means the
//! principal itself is rejected and is never retried. Logins for one principal
//! are serialized, and a caller that finds the token already refreshed by
//! someone else reuses it instead of logging in again, so a burst of `401`s
//! for one principal costs a single upstream login.

use crate::auth::api::{AuthenticationApi, HttpAuthenticationApi};
use crate::auth::context::{
    AuthenticationContext, ClientCertificate, HttpTransport, LoginFailure, PrincipalKind,
};
use crate::auth::registry::PrincipalRegistry;
use crate::auth::token::AuthenticationToken;
use crate::auth::traits::{SessionReAuthenticator, TokenProvider, TransportProvider};
use crate::client::chain::ApiClientChainBuilder;
use crate::client::metrics::ApiMetrics;
use crate::config::{
    GatewayConfig, ServiceDirectory, KEY_MANAGER_AUTH_SERVICE, SESSION_AUTH_SERVICE,
};
use crate::error::{Error, Result, ServiceKind};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of principals plus the two identity services they log in to.
pub struct AuthenticationProxy {
    registry: Arc<PrincipalRegistry>,
    session_api: Arc<dyn AuthenticationApi>,
    key_manager_api: Arc<dyn AuthenticationApi>,
}

impl AuthenticationProxy {
    /// Assemble a proxy from its parts.
    pub fn new(
        registry: Arc<PrincipalRegistry>,
        session_api: Arc<dyn AuthenticationApi>,
        key_manager_api: Arc<dyn AuthenticationApi>,
    ) -> Self {
        Self {
            registry,
            session_api,
            key_manager_api,
        }
    }

    /// Build a proxy from configuration.
    ///
    /// Fails with [`Error::AuthUrlNotFound`] when either identity service URL
    /// is missing, before any principal can be registered.
    pub fn from_config(config: &GatewayConfig, metrics: Arc<ApiMetrics>) -> Result<Self> {
        config.session_manager_url()?;
        config.key_manager_url()?;

        let services = Arc::new(ServiceDirectory::from_config(config)?);
        let registry = Arc::new(PrincipalRegistry::new(services, config.transport));
        let transports: Arc<dyn TransportProvider> = registry.clone();

        let session_client = ApiClientChainBuilder::for_authentication_service(
            SESSION_AUTH_SERVICE,
            ServiceKind::SessionAuth,
            Arc::clone(&transports),
            Arc::clone(&metrics),
        );
        let key_manager_client = ApiClientChainBuilder::for_authentication_service(
            KEY_MANAGER_AUTH_SERVICE,
            ServiceKind::KeyManagerAuth,
            transports,
            metrics,
        );

        Ok(Self::new(
            registry,
            Arc::new(HttpAuthenticationApi::new(session_client)),
            Arc::new(HttpAuthenticationApi::new(key_manager_client)),
        ))
    }

    /// The principal registry.
    pub fn registry(&self) -> &Arc<PrincipalRegistry> {
        &self.registry
    }

    /// Register a user, replacing any previous registration.
    pub fn register_principal(
        &self,
        principal_id: &str,
        certificate: Option<&ClientCertificate>,
    ) -> Result<()> {
        self.registry
            .register(principal_id, PrincipalKind::User, certificate)
            .map(|_| ())
    }

    /// Register an application, replacing any previous registration.
    pub fn register_application(
        &self,
        application_id: &str,
        certificate: Option<&ClientCertificate>,
    ) -> Result<()> {
        self.registry
            .register(application_id, PrincipalKind::Application, certificate)
            .map(|_| ())
    }

    /// Remove a principal. Returns whether it was registered.
    pub fn deregister_principal(&self, principal_id: &str) -> bool {
        self.registry.deregister(principal_id).is_some()
    }

    /// Log `principal_id` in to both identity services.
    ///
    /// Always performs the upstream calls; see
    /// [`ensure_authenticated`](Self::ensure_authenticated) to reuse a valid token.
    pub async fn authenticate(&self, principal_id: &str) -> Result<AuthenticationToken> {
        let context = self.registry.context(principal_id)?;
        let _login = context.lock_login().await;
        self.login(&context).await
    }

    /// Current token if authenticated, otherwise the result of a fresh login.
    pub async fn ensure_authenticated(&self, principal_id: &str) -> Result<AuthenticationToken> {
        let context = self.registry.context(principal_id)?;
        if context.is_authenticated() {
            return Ok(context.token());
        }

        let _login = context.lock_login().await;
        let snapshot = context.snapshot();
        if snapshot.authenticated {
            return Ok(snapshot.current);
        }
        self.login(&context).await
    }

    async fn login(&self, context: &AuthenticationContext) -> Result<AuthenticationToken> {
        let principal_id = context.principal_id();
        debug!(principal = %principal_id, "Authenticating");

        let session = match self.session_api.authenticate(principal_id).await {
            Ok(token) => token,
            Err(e) => return Err(Self::fail_login(context, e, ServiceKind::SessionAuth)),
        };
        let key_manager = match self.key_manager_api.authenticate(principal_id).await {
            Ok(token) => token,
            Err(e) => return Err(Self::fail_login(context, e, ServiceKind::KeyManagerAuth)),
        };

        let token = AuthenticationToken::new(session.token, key_manager.token);
        self.registry.assign_token(context, token.clone());
        context.record_login_success();
        info!(principal = %principal_id, "Authenticated");
        Ok(token)
    }

    fn fail_login(context: &AuthenticationContext, error: Error, service: ServiceKind) -> Error {
        let error = error.into_connectivity(service.clone());
        context.record_login_failure(LoginFailure::from_error(service.clone(), &error));
        warn!(
            principal = %context.principal_id(),
            service = %service,
            error = %error,
            "Authentication failed"
        );
        error
    }

    /// Whether `principal_id` holds a confirmed token. `false` when unregistered.
    pub fn is_authenticated(&self, principal_id: &str) -> bool {
        self.registry
            .get(principal_id)
            .is_some_and(|c| c.is_authenticated())
    }

    /// Current token of `principal_id`; VOID when never authenticated or unregistered.
    pub fn get_token(&self, principal_id: &str) -> AuthenticationToken {
        self.registry
            .get(principal_id)
            .map(|c| c.token())
            .unwrap_or(AuthenticationToken::VOID)
    }

    /// Current session token of `principal_id`; empty when there is none.
    pub fn get_session_token(&self, principal_id: &str) -> String {
        self.get_token(principal_id).session_token().to_string()
    }

    /// Force a logout. Token history is kept.
    pub fn invalidate(&self, principal_id: &str) -> Result<()> {
        self.registry.context(principal_id)?.invalidate_authentication();
        info!(principal = %principal_id, "Authentication invalidated");
        Ok(())
    }

    /// Whether `status` means the principal's credentials are structurally
    /// rejected, so logging in again cannot help.
    pub fn session_no_longer_entitled(status: u16) -> bool {
        status == StatusCode::FORBIDDEN.as_u16()
    }

    /// Log `principal_id` in again after a call failed with `status`.
    ///
    /// - `403`: fails with [`Error::UnexpectedAuth`] wrapping `cause`, no login
    /// - `401`: logs in; a login that could not reach an identity service fails
    ///   with that [`Error::Connectivity`], any other failed login with
    ///   [`Error::UnexpectedAuth`]
    /// - anything else: `cause` is returned unchanged
    pub async fn re_auth_or_throw(
        &self,
        principal_id: &str,
        status: u16,
        cause: Error,
    ) -> Result<AuthenticationToken> {
        if Self::session_no_longer_entitled(status) {
            return Err(Self::not_entitled(principal_id, cause));
        }
        if status != StatusCode::UNAUTHORIZED.as_u16() {
            return Err(cause);
        }

        let context = self.registry.context(principal_id)?;
        let attempted = context.token();
        self.re_auth_context(&context, attempted.session_token(), cause)
            .await
    }

    /// Re-authenticate the principal owning `session_token`.
    ///
    /// Fails with [`Error::UnregisteredPrincipal`] when no registered principal
    /// owns the token, otherwise behaves like
    /// [`re_auth_or_throw`](Self::re_auth_or_throw).
    pub async fn re_auth_session_or_throw(
        &self,
        session_token: &str,
        status: u16,
        cause: Error,
    ) -> Result<AuthenticationToken> {
        if !Self::session_no_longer_entitled(status) && status != StatusCode::UNAUTHORIZED.as_u16()
        {
            return Err(cause);
        }

        let context = self.registry.context_for_session_token(session_token)?;
        if Self::session_no_longer_entitled(status) {
            return Err(Self::not_entitled(context.principal_id(), cause));
        }
        self.re_auth_context(&context, session_token, cause).await
    }

    async fn re_auth_context(
        &self,
        context: &AuthenticationContext,
        attempted_session: &str,
        cause: Error,
    ) -> Result<AuthenticationToken> {
        let principal_id = context.principal_id();
        let epoch = context.login_epoch();
        let _login = context.lock_login().await;

        let snapshot = context.snapshot();
        let logged_in_meanwhile = context.login_epoch() != epoch;
        if snapshot.authenticated
            && (logged_in_meanwhile || snapshot.current.session_token() != attempted_session)
        {
            debug!(principal = %principal_id, "Token already refreshed by a concurrent call");
            return Ok(snapshot.current);
        }
        if logged_in_meanwhile {
            if let Some(failure) = context.last_login_failure() {
                debug!(principal = %principal_id, "Concurrent re-authentication failed");
                return Err(match failure.connectivity_error() {
                    Some(unreachable) => unreachable,
                    None => Self::reauth_failed(principal_id, failure.message(), cause),
                });
            }
        }

        warn!(principal = %principal_id, "Session rejected, re-authenticating");
        match self.login(context).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => Err(Self::reauth_failed(principal_id, &e.to_string(), cause)),
        }
    }

    fn reauth_failed(principal_id: &str, reason: &str, cause: Error) -> Error {
        Error::unexpected_auth(
            format!("Re-authentication of '{}' failed: {}", principal_id, reason),
            cause,
        )
    }

    fn not_entitled(principal_id: &str, cause: Error) -> Error {
        warn!(principal = %principal_id, "Principal is no longer entitled");
        Error::unexpected_auth(
            format!("Principal '{}' is no longer entitled to a session", principal_id),
            cause,
        )
    }

    /// Transport of user `principal_id` for `service`.
    pub fn http_client_for_user(&self, principal_id: &str, service: &str) -> Result<HttpTransport> {
        self.registry.transport_for_principal(principal_id, service)
    }

    /// Transport of application `application_id` for `service`.
    pub fn transport_for_application(
        &self,
        application_id: &str,
        service: &str,
    ) -> Result<HttpTransport> {
        match self.registry.get(application_id) {
            Some(context) if context.kind() == PrincipalKind::Application => {
                context.transport_for(service)
            },
            _ => Err(Error::unregistered(
                format!("Application '{}' is not registered", application_id),
                "Register the application with its certificate before calling on its behalf",
            )),
        }
    }

    /// Transport of the principal owning `session_token` for `service`.
    pub fn http_client_for_session_token(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<HttpTransport> {
        self.registry
            .transport_for_session_token(session_token, service)
    }
}

impl std::fmt::Debug for AuthenticationProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationProxy")
            .field("principals", &self.registry.len())
            .finish()
    }
}

impl TransportProvider for AuthenticationProxy {
    fn transport_for_principal(&self, principal_id: &str, service: &str) -> Result<HttpTransport> {
        self.registry.transport_for_principal(principal_id, service)
    }

    fn transport_for_session_token(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<HttpTransport> {
        self.registry
            .transport_for_session_token(session_token, service)
    }
}

#[async_trait]
impl TokenProvider for AuthenticationProxy {
    async fn ensure_token(&self, principal_id: &str) -> Result<AuthenticationToken> {
        self.ensure_authenticated(principal_id).await
    }
}

#[async_trait]
impl SessionReAuthenticator for AuthenticationProxy {
    async fn re_auth_session_or_throw(
        &self,
        session_token: &str,
        status: u16,
        cause: Error,
    ) -> Result<AuthenticationToken> {
        AuthenticationProxy::re_auth_session_or_throw(self, session_token, status, cause).await
    }
}
