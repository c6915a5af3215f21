//! Re-authentication behaviour of the full decorator chain over scripted
//! login services and a fake downstream service.

mod common;

use common::{proxy, CountingLogin, FakeService};
use integration_auth::client::{
    ApiClientChainBuilder, ApiKey, ApiMetrics, ApiRequest, ApiResponse, HttpApiClient,
    HttpApiClientExt, KEY_MANAGER_TOKEN_HEADER,
};
use integration_auth::logging::{self, TRACE_ID_HEADER};
use integration_auth::{
    AuthenticationProxy, AuthenticationToken, Error, ServiceKind, TransportError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn chain(
    service: Arc<FakeService>,
    proxy: Arc<AuthenticationProxy>,
    metrics: Arc<ApiMetrics>,
) -> Arc<dyn HttpApiClient> {
    ApiClientChainBuilder::new("pod", service)
        .with_auth_headers(proxy.clone())
        .with_connectivity(ServiceKind::Downstream("pod".to_string()))
        .with_reauthentication(proxy)
        .with_trace_logging()
        .with_metrics(metrics)
        .build()
}

fn ok(body: &str) -> integration_auth::Result<ApiResponse> {
    Ok(ApiResponse::new(200, body.as_bytes().to_vec()))
}

#[tokio::test]
async fn successful_retry_uses_new_credentials() {
    let session = CountingLogin::new("S");
    let key_manager = CountingLogin::new("K");
    let proxy = proxy(session.clone(), key_manager);
    let service = FakeService::new(|token| match token {
        Some("S1") => Err(Error::api(401, "session expired")),
        _ => ok(r#"{"id":42}"#),
    });
    let metrics = Arc::new(ApiMetrics::new());
    let client = chain(service.clone(), proxy.clone(), metrics.clone());

    let user: serde_json::Value = client.get_json("acme", "/v2/user/42").await.unwrap();

    assert_eq!(user, serde_json::json!({"id": 42}));
    assert_eq!(
        service.session_tokens(),
        vec![Some("S1".to_string()), Some("S2".to_string())]
    );
    assert_eq!(
        service.seen.lock()[1].header(KEY_MANAGER_TOKEN_HEADER),
        Some("K2")
    );
    assert_eq!(proxy.get_token("acme"), AuthenticationToken::new("S2", "K2"));
    assert_eq!(session.calls(), 2);

    let stats = metrics.stats(ApiKey::User);
    assert_eq!((stats.calls, stats.successes), (1, 1));
}

#[tokio::test]
async fn second_unauthorized_is_not_retried() {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    let service = FakeService::new(|_| Err(Error::api(401, "session expired")));
    let metrics = Arc::new(ApiMetrics::new());
    let client = chain(service.clone(), proxy, metrics.clone());

    let mut request = ApiRequest::get("/v1/message").for_principal("acme");
    let err = client.invoke(&mut request).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(service.invocations(), 2);
    // One login to attach headers, one re-authentication
    assert_eq!(session.calls(), 2);
    assert_eq!(metrics.stats(ApiKey::Message).failures, 1);
}

#[tokio::test]
async fn forbidden_never_reauthenticates() {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();

    let service = FakeService::new(|_| Err(Error::api(403, "not entitled")));
    let client = chain(service.clone(), proxy.clone(), Arc::new(ApiMetrics::new()));

    let err = client.delete("acme", "/v1/user/42").await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 403, .. }));
    assert_eq!(service.invocations(), 1);
    assert_eq!(session.calls(), 1);
    assert!(proxy.is_authenticated("acme"));
}

#[tokio::test]
async fn failed_reauthentication_returns_original_error() {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();
    session.fail_with(|| Error::api(503, "login unavailable"));

    let service = FakeService::new(|_| Err(Error::api(401, "session expired")));
    let client = chain(service.clone(), proxy.clone(), Arc::new(ApiMetrics::new()));

    let err = client
        .invoke(&mut ApiRequest::get("/v1/user").for_principal("acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { status: 401, .. }));
    assert_eq!(service.invocations(), 1);
    assert!(!proxy.is_authenticated("acme"));
    assert_eq!(proxy.get_session_token("acme"), "S1");
}

#[tokio::test]
async fn other_statuses_pass_through() {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    let service = FakeService::new(|_| Err(Error::api(404, "no such user")));
    let client = chain(service.clone(), proxy, Arc::new(ApiMetrics::new()));

    let err = client
        .get_json::<serde_json::Value>("acme", "/v2/user/7")
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(service.invocations(), 1);
    assert_eq!(session.calls(), 1);
}

#[tokio::test]
async fn unknown_session_token_is_unregistered() {
    let proxy = proxy(CountingLogin::new("S"), CountingLogin::new("K"));
    let service = FakeService::new(|_| Err(Error::api(401, "who are you")));
    let client = chain(service, proxy, Arc::new(ApiMetrics::new()));

    let mut request = ApiRequest::get("/v1/user").with_header("sessionToken", "forged");
    let err = client.invoke(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::UnregisteredPrincipal { .. }));
}

#[tokio::test]
async fn trace_id_is_shared_by_retry_and_scope() {
    let proxy = proxy(CountingLogin::new("S"), CountingLogin::new("K"));
    let service = FakeService::new(|token| match token {
        Some("S1") => Err(Error::api(401, "session expired")),
        _ => ok("{}"),
    });
    let client = chain(service.clone(), proxy, Arc::new(ApiMetrics::new()));

    let scoped = logging::with_trace_scope(Some("req042".to_string()), async {
        client
            .invoke(&mut ApiRequest::get("/v1/user").for_principal("acme"))
            .await
            .unwrap();
        logging::current_trace_id()
    })
    .await;

    assert_eq!(scoped.as_deref(), Some("req042"));
    for request in service.seen.lock().iter() {
        assert_eq!(request.header(TRACE_ID_HEADER), Some("req042"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_calls_collapse_into_one_login() {
    let session = CountingLogin::with_delay("S", Duration::from_millis(20));
    let key_manager = CountingLogin::new("K");
    let proxy = proxy(session.clone(), key_manager);
    proxy.authenticate("acme").await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                proxy
                    .re_auth_session_or_throw("S1", 401, Error::api(401, "session expired"))
                    .await
            })
        })
        .collect();

    for task in tasks {
        let token = task.await.unwrap().unwrap();
        assert_eq!(token.session_token(), "S2");
    }
    assert_eq!(session.calls(), 2);
    assert_eq!(proxy.get_token("acme").session_token(), "S2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_through_chain_bound_logins() {
    let session = CountingLogin::with_delay("S", Duration::from_millis(10));
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();

    let service = FakeService::new(|token| match token {
        Some("S1") => Err(Error::api(401, "session expired")),
        _ => ok("{}"),
    });
    let client = chain(service.clone(), proxy.clone(), Arc::new(ApiMetrics::new()));

    let calls = (0..8).map(|_| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .invoke(&mut ApiRequest::get("/v1/user").for_principal("acme"))
                .await
        })
    });
    for outcome in futures::future::join_all(calls).await {
        outcome.unwrap().unwrap();
    }

    // Every call that saw S1 retried with S2; only one re-login happened
    assert_eq!(session.calls(), 2);
}

fn session_unreachable() -> Error {
    Error::Connectivity {
        service: ServiceKind::SessionAuth,
        source: TransportError::connect("connection refused"),
    }
}

#[tokio::test]
async fn unreachable_login_service_surfaces_through_chain() {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();
    session.fail_with(session_unreachable);

    let service = FakeService::new(|_| Err(Error::api(401, "expired")));
    let client = chain(service.clone(), proxy.clone(), Arc::new(ApiMetrics::new()));

    let err = client
        .invoke(&mut ApiRequest::get("/v1/user").for_principal("acme"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Connectivity {
            service: ServiceKind::SessionAuth,
            ..
        }
    ));
    assert_eq!(service.invocations(), 1);
    assert!(!proxy.is_authenticated("acme"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_calls_share_a_failed_login() {
    let session = CountingLogin::with_delay("S", Duration::from_millis(100));
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();
    session.fail_with(|| Error::api(503, "login unavailable"));

    let calls = (0..10).map(|_| {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            proxy
                .re_auth_session_or_throw("S1", 401, Error::api(401, "session expired"))
                .await
        })
    });

    for outcome in futures::future::join_all(calls).await {
        match outcome.unwrap() {
            Err(Error::UnexpectedAuth { source, .. }) => assert_eq!(source.status(), Some(401)),
            other => panic!("expected a refused re-authentication, got {:?}", other),
        }
    }
    // One login to start with, one failed re-authentication shared by all
    assert_eq!(session.calls(), 2);
    assert!(!proxy.is_authenticated("acme"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_all_see_unreachable_login_service() {
    let session = CountingLogin::with_delay("S", Duration::from_millis(100));
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();
    session.fail_with(session_unreachable);

    let service = FakeService::new(|_| Err(Error::api(401, "expired")));
    let client = chain(service.clone(), proxy.clone(), Arc::new(ApiMetrics::new()));

    let calls = (0..6).map(|_| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .invoke(&mut ApiRequest::get("/v1/user").for_principal("acme"))
                .await
        })
    });

    for outcome in futures::future::join_all(calls).await {
        let err = outcome.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Connectivity {
                service: ServiceKind::SessionAuth,
                ..
            }
        ));
    }
    assert_eq!(session.calls(), 2);
}

#[tokio::test]
async fn cancelled_first_login_leaves_context_unauthenticated() {
    let session = CountingLogin::new("S");
    let key_manager = CountingLogin::with_delay("K", Duration::from_millis(200));
    let proxy = proxy(session.clone(), key_manager.clone());

    let cancelled = tokio::time::timeout(Duration::from_millis(50), proxy.authenticate("acme")).await;

    assert!(cancelled.is_err());
    assert_eq!(session.calls(), 1);
    assert_eq!(key_manager.calls(), 1);
    assert!(!proxy.is_authenticated("acme"));
    assert!(proxy.get_token("acme").is_void());

    // The login lock was released with the dropped future
    let token = tokio::time::timeout(Duration::from_secs(5), proxy.authenticate("acme"))
        .await
        .expect("login lock still held")
        .unwrap();
    assert_eq!(token, AuthenticationToken::new("S2", "K2"));
    assert!(proxy.is_authenticated("acme"));
}

#[tokio::test]
async fn cancelled_refresh_keeps_confirmed_token() {
    let session = CountingLogin::new("S");
    let key_manager = CountingLogin::with_delay("K", Duration::from_millis(200));
    let proxy = proxy(session.clone(), key_manager);
    proxy.authenticate("acme").await.unwrap();

    let refresh = proxy.re_auth_session_or_throw("S1", 401, Error::api(401, "expired"));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), refresh).await;

    assert!(cancelled.is_err());
    assert_eq!(session.calls(), 2);
    assert_eq!(proxy.get_token("acme"), AuthenticationToken::new("S1", "K1"));
    assert!(proxy.is_authenticated("acme"));
    assert!(matches!(
        proxy.registry().context_for_session_token("S2"),
        Err(Error::UnregisteredPrincipal { .. })
    ));
}
