//! Request-scoped trace context and subscriber setup.
//!
//! A trace identifier travels with each request in a task-local cell so that
//! log lines and outbound `X-Trace-Id` headers stay consistent. The surrounding
//! request handler opens the scope with [`with_trace_scope`]; the API client
//! chain reads and updates it through [`propagate`].

use std::cell::RefCell;
use std::future::Future;

/// Header carrying the trace identifier on outbound calls.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

const TRACE_ID_LEN: usize = 6;

tokio::task_local! {
    static TRACE_ID: RefCell<Option<String>>;
}

/// Run `fut` inside a trace scope seeded with `trace_id`.
///
/// Scopes nest; the inner scope shadows the outer one until it completes.
pub async fn with_trace_scope<F>(trace_id: Option<String>, fut: F) -> F::Output
where
    F: Future,
{
    TRACE_ID.scope(RefCell::new(trace_id), fut).await
}

/// Trace id of the current scope, if any.
pub fn current_trace_id() -> Option<String> {
    TRACE_ID
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

/// Store `trace_id` in the current scope.
///
/// Returns `false` when called outside a scope, in which case nothing is stored.
pub fn set_trace_id(trace_id: impl Into<String>) -> bool {
    let trace_id = trace_id.into();
    TRACE_ID
        .try_with(|cell| *cell.borrow_mut() = Some(trace_id))
        .is_ok()
}

/// Generate a fresh 6-character alphanumeric trace id.
pub fn generate_trace_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(TRACE_ID_LEN);
    id
}

/// Compose a child id `base:xxxxxx` from `base`.
pub fn child_trace_id(base: &str) -> String {
    format!("{}:{}", base, generate_trace_id())
}

/// Fold an ambient id and a caller-supplied header id into one canonical id.
///
/// The ambient id always wins. A bare header id gets a child id so calls fanning
/// out from it remain distinguishable; with neither a fresh id is generated.
pub fn fold_trace_id(ambient: Option<&str>, header: Option<&str>) -> String {
    let ambient = ambient.filter(|v| !v.is_empty());
    let header = header.filter(|v| !v.is_empty());
    match (ambient, header) {
        (Some(ambient), _) => ambient.to_string(),
        (None, Some(header)) => child_trace_id(header),
        (None, None) => generate_trace_id(),
    }
}

/// Fold the ambient id with `header`, store the result in the scope and return it.
///
/// The caller writes the returned value to the outbound header.
pub fn propagate(header: Option<&str>) -> String {
    let trace_id = fold_trace_id(current_trace_id().as_deref(), header);
    set_trace_id(trace_id.clone());
    trace_id
}

/// Install a `tracing-subscriber` fmt subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Calling it twice is harmless;
/// the second installation is ignored.
#[cfg(feature = "logging")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
