//! Call metrics for the API client chain.
//!
//! Calls are grouped by API key, derived from the request path. Every key
//! tracks the number of calls, their total duration and how many succeeded or
//! failed; a gauge tracks calls currently in flight.

use crate::client::http_client::{ApiRequest, ApiResponse, HttpApiClient};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Group a call is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKey {
    /// Configuration endpoints.
    Configuration,
    /// Instance endpoints.
    Instance,
    /// User endpoints.
    User,
    /// Message endpoints.
    Message,
    /// Login endpoints.
    Authenticate,
    /// Anything else.
    Other,
}

impl ApiKey {
    /// Every key, in snapshot order.
    pub const ALL: [ApiKey; 6] = [
        ApiKey::Configuration,
        ApiKey::Instance,
        ApiKey::User,
        ApiKey::Message,
        ApiKey::Authenticate,
        ApiKey::Other,
    ];

    /// Key name as used in snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Instance => "instance",
            Self::User => "user",
            Self::Message => "message",
            Self::Authenticate => "authenticate",
            Self::Other => "other",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|k| *k != Self::Other)
            .find(|k| k.as_str().eq_ignore_ascii_case(segment))
    }

    /// Key of a request path: the last path segment naming a known key, else `Other`.
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.rsplit('/')
            .find_map(Self::from_segment)
            .unwrap_or(Self::Other)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct ApiStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
}

/// Counters for one API key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStatsSnapshot {
    /// Completed calls.
    pub calls: u64,
    /// Calls that returned a 2xx response.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Sum of call durations in milliseconds.
    pub total_duration_ms: f64,
    /// `successes / calls`, 0 with no calls.
    pub success_ratio: f64,
    /// `failures / calls`, 0 with no calls.
    pub failure_ratio: f64,
}

/// Serializable view of [`ApiMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMetricsSnapshot {
    /// Calls in flight.
    pub active_calls: i64,
    /// Counters per API key.
    pub apis: BTreeMap<ApiKey, ApiStatsSnapshot>,
}

/// Started call. Dropping it without [`ApiMetrics::finish_api_call`] only
/// releases the in-flight gauge, so cancelled calls are not counted.
#[derive(Debug)]
pub struct ApiCallTimer {
    key: ApiKey,
    started: Instant,
    active: Arc<AtomicI64>,
}

impl ApiCallTimer {
    /// Key the call is counted under.
    pub fn key(&self) -> ApiKey {
        self.key
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ApiCallTimer {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Process-wide call metrics, shared by every chain.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    active: Arc<AtomicI64>,
    stats: [ApiStats; 6],
}

impl ApiMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a call to `path`.
    pub fn start_api_call(&self, path: &str) -> ApiCallTimer {
        self.active.fetch_add(1, Ordering::Relaxed);
        ApiCallTimer {
            key: ApiKey::from_path(path),
            started: Instant::now(),
            active: Arc::clone(&self.active),
        }
    }

    /// Record the outcome of a call.
    pub fn finish_api_call(&self, timer: ApiCallTimer, success: bool) {
        let stats = &self.stats[timer.key.index()];
        let micros = u64::try_from(timer.elapsed().as_micros()).unwrap_or(u64::MAX);
        stats.calls.fetch_add(1, Ordering::Relaxed);
        stats.total_micros.fetch_add(micros, Ordering::Relaxed);
        if success {
            stats.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Calls currently in flight.
    pub fn active_calls(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Counters for one key.
    pub fn stats(&self, key: ApiKey) -> ApiStatsSnapshot {
        let stats = &self.stats[key.index()];
        let calls = stats.calls.load(Ordering::Relaxed);
        let successes = stats.successes.load(Ordering::Relaxed);
        let failures = stats.failures.load(Ordering::Relaxed);
        let ratio = |n: u64| if calls == 0 { 0.0 } else { n as f64 / calls as f64 };

        ApiStatsSnapshot {
            calls,
            successes,
            failures,
            total_duration_ms: stats.total_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            success_ratio: ratio(successes),
            failure_ratio: ratio(failures),
        }
    }

    /// Counters for every key.
    pub fn snapshot(&self) -> ApiMetricsSnapshot {
        ApiMetricsSnapshot {
            active_calls: self.active_calls(),
            apis: ApiKey::ALL.into_iter().map(|k| (k, self.stats(k))).collect(),
        }
    }
}

/// Outermost layer: counts every call into [`ApiMetrics`].
pub struct MetricsClient {
    inner: Arc<dyn HttpApiClient>,
    metrics: Arc<ApiMetrics>,
}

impl MetricsClient {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn HttpApiClient>, metrics: Arc<ApiMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl HttpApiClient for MetricsClient {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        let timer = self.metrics.start_api_call(&request.path);
        let result = self.inner.invoke(request).await;
        self.metrics.finish_api_call(timer, result.is_ok());
        result
    }
}
