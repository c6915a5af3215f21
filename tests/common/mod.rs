//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use integration_auth::auth::{
    AuthenticationApi, AuthenticationProxy, PrincipalRegistry, SessionToken,
};
use integration_auth::client::{ApiRequest, ApiResponse, HttpApiClient};
use integration_auth::{Error, Result, ServiceDirectory, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Login API issuing `<prefix>1`, `<prefix>2`, ... on successive calls.
pub struct CountingLogin {
    prefix: &'static str,
    calls: AtomicUsize,
    delay: Duration,
    failure: Mutex<Option<fn() -> Error>>,
}

impl CountingLogin {
    pub fn new(prefix: &'static str) -> Arc<Self> {
        Self::with_delay(prefix, Duration::ZERO)
    }

    pub fn with_delay(prefix: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            prefix,
            calls: AtomicUsize::new(0),
            delay,
            failure: Mutex::new(None),
        })
    }

    /// Make every following call fail with `error()`.
    pub fn fail_with(&self, error: fn() -> Error) {
        *self.failure.lock() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationApi for CountingLogin {
    async fn authenticate(&self, _principal_id: &str) -> Result<SessionToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = *self.failure.lock() {
            return Err(error());
        }
        Ok(SessionToken {
            name: "token".to_string(),
            token: format!("{}{}", self.prefix, n),
        })
    }
}

/// Downstream service that answers by the session token it receives.
pub struct FakeService {
    respond: fn(Option<&str>) -> Result<ApiResponse>,
    pub seen: Mutex<Vec<ApiRequest>>,
}

impl FakeService {
    pub fn new(respond: fn(Option<&str>) -> Result<ApiResponse>) -> Arc<Self> {
        Arc::new(Self {
            respond,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn session_tokens(&self) -> Vec<Option<String>> {
        self.seen
            .lock()
            .iter()
            .map(|r| r.session_token().map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl HttpApiClient for FakeService {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        self.seen.lock().push(request.clone());
        (self.respond)(request.session_token())
    }
}

/// Proxy over scripted login APIs with `acme` registered as an application.
pub fn proxy(
    session: Arc<CountingLogin>,
    key_manager: Arc<CountingLogin>,
) -> Arc<AuthenticationProxy> {
    let registry = Arc::new(PrincipalRegistry::new(
        Arc::new(ServiceDirectory::new()),
        TransportConfig::default(),
    ));
    let proxy = Arc::new(AuthenticationProxy::new(registry, session, key_manager));
    proxy
        .register_application("acme", None)
        .expect("registration without a certificate cannot fail");
    proxy
}
