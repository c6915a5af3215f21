//! Token history and re-authentication classification.

mod common;

use common::{proxy, CountingLogin};
use integration_auth::auth::{PrincipalKind, PrincipalRegistry};
use integration_auth::{
    AuthenticationProxy, AuthenticationToken, Error, ServiceDirectory, TransportConfig,
};
use proptest::prelude::*;
use rstest::rstest;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Step {
    Assign,
    Invalidate,
    Reregister,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => Just(Step::Assign),
        3 => Just(Step::Invalidate),
        1 => Just(Step::Reregister),
    ]
}

#[derive(Debug, Default)]
struct Model {
    current: Option<String>,
    previous: Option<String>,
    authenticated: bool,
}

fn registry() -> PrincipalRegistry {
    PrincipalRegistry::new(Arc::new(ServiceDirectory::new()), TransportConfig::default())
}

proptest! {
    #[test]
    fn history_and_lookup_follow_assignments(steps in prop::collection::vec(step(), 1..40)) {
        let registry = registry();
        registry.register("acme", PrincipalKind::Application, None).unwrap();
        let mut model = Model::default();
        let mut issued = Vec::new();

        for (i, step) in steps.iter().enumerate() {
            let context = registry.context("acme").unwrap();
            match step {
                Step::Assign => {
                    let session = format!("S{}", i);
                    let token = AuthenticationToken::new(session.clone(), format!("K{}", i));
                    registry.assign_token(&context, token);
                    model.previous = model.current.replace(session.clone());
                    model.authenticated = true;
                    issued.push(session);
                },
                Step::Invalidate => {
                    context.invalidate_authentication();
                    model.authenticated = false;
                },
                Step::Reregister => {
                    registry.register("acme", PrincipalKind::Application, None).unwrap();
                    model = Model::default();
                },
            }

            let context = registry.context("acme").unwrap();
            let snapshot = context.snapshot();
            prop_assert_eq!(snapshot.authenticated, model.authenticated);
            prop_assert_eq!(
                snapshot.current.session_token(),
                model.current.as_deref().unwrap_or("")
            );
            prop_assert_eq!(
                snapshot.previous.session_token(),
                model.previous.as_deref().unwrap_or("")
            );

            for session in &issued {
                let held = model.current.as_ref() == Some(session)
                    || model.previous.as_ref() == Some(session);
                prop_assert_eq!(registry.context_for_session_token(session).is_ok(), held);
            }
        }
    }

    #[test]
    fn void_assignment_never_touches_history(assigned in 0usize..5) {
        let registry = registry();
        let context = registry.register("acme", PrincipalKind::User, None).unwrap();
        for i in 0..assigned {
            registry.assign_token(&context, AuthenticationToken::new(format!("S{}", i), "K"));
        }
        let before = context.snapshot();

        prop_assert!(context.set_token(Some(AuthenticationToken::VOID)).is_none());
        let after = context.snapshot();
        prop_assert!(!after.authenticated);
        prop_assert_eq!(after.current, before.current);
        prop_assert_eq!(after.previous, before.previous);
    }
}

#[test]
fn empty_session_token_is_never_found() {
    let registry = registry();
    let context = registry.register("acme", PrincipalKind::Application, None).unwrap();
    assert!(matches!(
        registry.context_for_session_token(""),
        Err(Error::UnregisteredPrincipal { .. })
    ));
    registry.assign_token(&context, AuthenticationToken::new("S1", "K1"));
    assert!(registry.context_for_session_token("").is_err());
}

#[test]
fn session_tokens_resolve_to_their_own_principal() {
    let registry = registry();
    let acme = registry.register("acme", PrincipalKind::Application, None).unwrap();
    let jane = registry.register("jane", PrincipalKind::User, None).unwrap();
    registry.assign_token(&acme, AuthenticationToken::new("A1", "K"));
    registry.assign_token(&jane, AuthenticationToken::new("J1", "K"));
    registry.assign_token(&acme, AuthenticationToken::new("A2", "K"));

    for (session, owner) in [("A1", "acme"), ("A2", "acme"), ("J1", "jane")] {
        let context = registry.context_for_session_token(session).unwrap();
        assert_eq!(context.principal_id(), owner);
    }

    registry.deregister("acme");
    assert!(registry.context_for_session_token("A2").is_err());
    assert!(registry.context_for_session_token("J1").is_ok());
}

#[rstest]
#[case(200, false)]
#[case(401, false)]
#[case(403, true)]
#[case(404, false)]
#[case(500, false)]
fn entitlement_is_lost_only_on_forbidden(#[case] status: u16, #[case] lost: bool) {
    assert_eq!(AuthenticationProxy::session_no_longer_entitled(status), lost);
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Refreshed,
    NotEntitled,
    Passthrough,
}

async fn classify(by_session: bool, status: u16) -> (Outcome, usize) {
    let session = CountingLogin::new("S");
    let proxy = proxy(session.clone(), CountingLogin::new("K"));
    proxy.authenticate("acme").await.unwrap();

    let cause = Error::api(status, "rejected");
    let result = if by_session {
        proxy.re_auth_session_or_throw("S1", status, cause).await
    } else {
        proxy.re_auth_or_throw("acme", status, cause).await
    };

    let outcome = match result {
        Ok(token) => {
            assert_eq!(token.session_token(), "S2");
            Outcome::Refreshed
        },
        Err(Error::UnexpectedAuth { source, .. }) => {
            assert_eq!(source.status(), Some(status));
            assert!(proxy.is_authenticated("acme"));
            Outcome::NotEntitled
        },
        Err(e) => {
            assert_eq!(e.status(), Some(status));
            Outcome::Passthrough
        },
    };
    (outcome, session.calls())
}

#[rstest]
#[case(401, Outcome::Refreshed, 2)]
#[case(403, Outcome::NotEntitled, 1)]
#[case(404, Outcome::Passthrough, 1)]
#[case(429, Outcome::Passthrough, 1)]
#[case(500, Outcome::Passthrough, 1)]
#[tokio::test]
async fn status_decides_reauthentication(
    #[values(false, true)] by_session: bool,
    #[case] status: u16,
    #[case] expected: Outcome,
    #[case] logins: usize,
) {
    assert_eq!(classify(by_session, status).await, (expected, logins));
}

#[tokio::test]
async fn reauthenticating_unregistered_principal_fails() {
    let proxy = proxy(CountingLogin::new("S"), CountingLogin::new("K"));
    let err = proxy
        .re_auth_or_throw("ghost", 401, Error::api(401, "expired"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnregisteredPrincipal { .. }));
}
