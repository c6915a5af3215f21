//! Per-principal authentication state and transports.

use crate::auth::token::AuthenticationToken;
use crate::config::{ServiceDirectory, TransportConfig};
use crate::error::{Error, Result, ServiceKind, TransportError, TransportErrorKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use url::Url;

/// What kind of identity a principal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// An end user acting through the gateway.
    User,
    /// An integration application.
    Application,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// PEM-encoded client certificate and private key used for mutual TLS.
#[derive(Clone)]
pub struct ClientCertificate {
    pem: Vec<u8>,
}

impl ClientCertificate {
    /// Wrap PEM data holding the certificate chain and an unencrypted private key.
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self { pem: pem.into() }
    }

    /// Read PEM data from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::read(path)
            .map(Self::from_pem)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path.display(), e)))
    }

    fn identity(&self, principal_id: &str) -> Result<reqwest::Identity> {
        reqwest::Identity::from_pem(&self.pem).map_err(|e| Error::Certificate {
            principal: principal_id.to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("pem_len", &self.pem.len())
            .finish()
    }
}

/// Point-in-time view of a context's token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    /// Token in use.
    pub current: AuthenticationToken,
    /// Token held before the last successful assignment.
    pub previous: AuthenticationToken,
    /// Whether `current` is confirmed and not invalidated.
    pub authenticated: bool,
}

/// Why the most recent login of a principal failed.
///
/// Callers that queued behind that login reuse it instead of calling the
/// identity services again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFailure {
    service: ServiceKind,
    transport: Option<TransportErrorKind>,
    message: String,
}

impl LoginFailure {
    /// Record `error` raised while logging in to `service`.
    pub fn from_error(service: ServiceKind, error: &Error) -> Self {
        match error {
            Error::Connectivity { service, source } => Self {
                service: service.clone(),
                transport: Some(source.kind()),
                message: source.message().to_string(),
            },
            other => Self {
                service,
                transport: None,
                message: other.to_string(),
            },
        }
    }

    /// Service the failed call went to.
    pub fn service(&self) -> &ServiceKind {
        &self.service
    }

    /// Description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The connectivity error to report again, when the service was unreachable.
    pub fn connectivity_error(&self) -> Option<Error> {
        self.transport.map(|kind| Error::Connectivity {
            service: self.service.clone(),
            source: TransportError::new(kind, self.message.clone()),
        })
    }
}

#[derive(Debug)]
struct TokenState {
    current: AuthenticationToken,
    previous: AuthenticationToken,
    authenticated: bool,
    login_epoch: u64,
    last_failure: Option<LoginFailure>,
}

impl Default for TokenState {
    fn default() -> Self {
        Self {
            current: AuthenticationToken::VOID,
            previous: AuthenticationToken::VOID,
            authenticated: false,
            login_epoch: 0,
            last_failure: None,
        }
    }
}

/// Pooled HTTP transport bound to one service.
///
/// Cheap to clone; clones share the connection pool and the in-flight limit.
#[derive(Clone)]
pub struct HttpTransport {
    service: String,
    base_url: Url,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    config: TransportConfig,
}

impl HttpTransport {
    /// Build a transport for `service` rooted at `base_url`.
    pub fn build(
        service: impl Into<String>,
        base_url: Url,
        config: TransportConfig,
        identity: Option<reqwest::Identity>,
    ) -> Result<Self> {
        let config = config.clamped();
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(config.max_connections_per_route);
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            service: service.into(),
            base_url,
            client,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
        })
    }

    /// Service this transport targets.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Underlying client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Effective (clamped) configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Wait for an in-flight slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.map_err(|_| {
            Error::Transport(TransportError::new(
                TransportErrorKind::Io,
                format!("transport for {} is shut down", self.service),
            ))
        })
    }

    /// In-flight slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Resolve `path` and `query` against the base URL.
    ///
    /// The path is appended to the base path, so a base of
    /// `https://host/sessionauth` and a path of `/v1/authenticate` yield
    /// `https://host/sessionauth/v1/authenticate`.
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| Error::InvalidRequest(format!("bad path '{}': {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("config", &self.config)
            .finish()
    }
}

/// Mutable authentication state of one registered principal.
///
/// Token assignment happens under a single write lock, so observers never see
/// a half-updated pair. Logins are serialized through [`lock_login`](Self::lock_login).
pub struct AuthenticationContext {
    principal_id: String,
    kind: PrincipalKind,
    state: RwLock<TokenState>,
    login_lock: Mutex<()>,
    transport_config: TransportConfig,
    identity: Option<reqwest::Identity>,
    services: Arc<ServiceDirectory>,
    transports: RwLock<HashMap<String, HttpTransport>>,
}

impl AuthenticationContext {
    /// Create a context.
    ///
    /// Certificate material is decoded here, so an unusable certificate fails
    /// the registration instead of the first call.
    pub fn new(
        principal_id: impl Into<String>,
        kind: PrincipalKind,
        certificate: Option<&ClientCertificate>,
        transport_config: TransportConfig,
        services: Arc<ServiceDirectory>,
    ) -> Result<Self> {
        let principal_id = principal_id.into();
        let identity = certificate
            .map(|cert| cert.identity(&principal_id))
            .transpose()?;

        Ok(Self {
            principal_id,
            kind,
            state: RwLock::new(TokenState::default()),
            login_lock: Mutex::new(()),
            transport_config: transport_config.clamped(),
            identity,
            services,
            transports: RwLock::new(HashMap::new()),
        })
    }

    /// Principal identifier.
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// Principal kind.
    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// Assign a token.
    ///
    /// A real token moves the current one to `previous`, becomes current and
    /// marks the context authenticated. `None` or VOID only clears the flag.
    /// Returns the token that fell out of the history, if one did.
    pub fn set_token(&self, token: Option<AuthenticationToken>) -> Option<AuthenticationToken> {
        let mut state = self.state.write();
        match token.filter(|t| !t.is_void()) {
            Some(token) => {
                let displaced = std::mem::replace(&mut state.current, token);
                let dropped = std::mem::replace(&mut state.previous, displaced);
                state.authenticated = true;
                Some(dropped)
            },
            None => {
                state.authenticated = false;
                None
            },
        }
    }

    /// Clear the authenticated flag, keeping token history.
    pub fn invalidate_authentication(&self) {
        self.set_token(None);
    }

    /// Whether the current token is confirmed and not invalidated.
    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    /// Current token (VOID if never authenticated).
    pub fn token(&self) -> AuthenticationToken {
        self.state.read().current.clone()
    }

    /// Token held before the last assignment.
    pub fn previous_token(&self) -> AuthenticationToken {
        self.state.read().previous.clone()
    }

    /// Consistent view of current, previous and the flag.
    pub fn snapshot(&self) -> TokenSnapshot {
        let state = self.state.read();
        TokenSnapshot {
            current: state.current.clone(),
            previous: state.previous.clone(),
            authenticated: state.authenticated,
        }
    }

    /// Whether `session_token` is this context's current or previous session token.
    pub fn owns_session_token(&self, session_token: &str) -> bool {
        if session_token.is_empty() {
            return false;
        }
        let state = self.state.read();
        state.current.session_token() == session_token
            || state.previous.session_token() == session_token
    }

    /// Number of logins completed so far, successful or not.
    ///
    /// Read before [`lock_login`](Self::lock_login) and compared after it to
    /// learn whether another caller logged in meanwhile.
    pub fn login_epoch(&self) -> u64 {
        self.state.read().login_epoch
    }

    /// Failure of the most recent completed login; `None` when it succeeded.
    pub fn last_login_failure(&self) -> Option<LoginFailure> {
        self.state.read().last_failure.clone()
    }

    /// Close a successful login. The token is assigned separately.
    pub fn record_login_success(&self) {
        let mut state = self.state.write();
        state.login_epoch += 1;
        state.last_failure = None;
    }

    /// Close a failed login: clear the authenticated flag and keep `failure`.
    pub fn record_login_failure(&self, failure: LoginFailure) {
        let mut state = self.state.write();
        state.authenticated = false;
        state.login_epoch += 1;
        state.last_failure = Some(failure);
    }

    /// Serialize logins for this principal.
    pub async fn lock_login(&self) -> MutexGuard<'_, ()> {
        self.login_lock.lock().await
    }

    /// Transport for `service`, built on first use and cached.
    ///
    /// The transport carries no token; headers are attached per request.
    pub fn transport_for(&self, service: &str) -> Result<HttpTransport> {
        if let Some(transport) = self.transports.read().get(service) {
            return Ok(transport.clone());
        }

        let base_url = self.services.resolve(service)?.clone();
        let built = HttpTransport::build(
            service,
            base_url,
            self.transport_config,
            self.identity.clone(),
        )?;

        let mut transports = self.transports.write();
        let transport = transports
            .entry(service.to_string())
            .or_insert(built)
            .clone();
        Ok(transport)
    }

    /// Number of transports built so far.
    pub fn cached_transports(&self) -> usize {
        self.transports.read().len()
    }
}

impl fmt::Debug for AuthenticationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationContext")
            .field("principal_id", &self.principal_id)
            .field("kind", &self.kind)
            .field("authenticated", &self.is_authenticated())
            .field("mutual_tls", &self.identity.is_some())
            .field("transports", &self.cached_transports())
            .finish()
    }
}
