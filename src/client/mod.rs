//! API client chain: a base HTTP client wrapped in single-purpose layers.

pub mod auth_header;
pub mod chain;
pub mod connectivity;
pub mod http_client;
pub mod metrics;
pub mod reauth;
pub mod trace_logging;

pub use chain::ApiClientChainBuilder;
pub use http_client::{
    ApiRequest, ApiResponse, HttpApiClient, HttpApiClientExt, ReqwestApiClient,
    KEY_MANAGER_TOKEN_HEADER, SESSION_TOKEN_HEADER,
};
pub use metrics::{ApiKey, ApiMetrics, ApiMetricsSnapshot};
