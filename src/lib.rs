//! # integration-auth
//!
//! Credential and session layer of a multi-tenant integration gateway.
//!
//! The gateway calls upstream services on behalf of many registered
//! principals (applications or users). For each principal this crate:
//!
//! - logs in to the Session Authentication Service and the Key Manager
//!   Authentication Service and caches the resulting token pair
//! - attaches the tokens to outbound calls
//! - re-authenticates once when a call is rejected with `401`
//! - reports unreachable services as connectivity errors naming the service
//! - propagates a request trace id and counts every call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integration_auth::{
//!     ApiClientChainBuilder, ApiMetrics, AuthenticationProxy, GatewayConfig, HttpApiClientExt,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> integration_auth::Result<()> {
//! let config = GatewayConfig::load()?;
//! let metrics = Arc::new(ApiMetrics::new());
//! let proxy = Arc::new(AuthenticationProxy::from_config(&config, metrics.clone())?);
//! proxy.register_application("acme", None)?;
//!
//! let pod = ApiClientChainBuilder::for_service("pod", proxy.clone(), metrics)?;
//! let user: serde_json::Value = pod.get_json("acme", "/v2/user/42").await?;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod shared;

pub use auth::{
    AuthenticationContext, AuthenticationProxy, AuthenticationToken, ClientCertificate,
    PrincipalKind, PrincipalRegistry,
};
pub use client::{
    ApiClientChainBuilder, ApiMetrics, ApiRequest, ApiResponse, HttpApiClient, HttpApiClientExt,
};
pub use config::{GatewayConfig, ServiceDirectory, TransportConfig};
pub use error::{Error, Result, ServiceKind, TransportError};
