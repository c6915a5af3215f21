//! Gateway configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`integration-auth.toml`)
//! 2. Environment variables (with `INTEGRATION_AUTH_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [authentication]
//! session_manager_url = "https://pod.example.com:8444/sessionauth"
//! key_manager_url = "https://km.example.com:8444/relay"
//!
//! [transport]
//! connect_timeout_ms = 2000
//! read_timeout_ms = 4000
//! max_connections = 60
//! max_connections_per_route = 20
//!
//! [services]
//! pod = "https://pod.example.com/pod"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default configuration file looked up by [`GatewayConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "integration-auth.toml";

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "INTEGRATION_AUTH_";

/// Service name under which the Session Authentication Service is registered.
pub const SESSION_AUTH_SERVICE: &str = "session_auth";

/// Service name under which the Key Manager Authentication Service is registered.
pub const KEY_MANAGER_AUTH_SERVICE: &str = "key_manager_auth";

/// Configuration key reported when the session service URL is missing.
pub const SESSION_MANAGER_URL_KEY: &str = "authentication.session_manager_url";

/// Configuration key reported when the key manager URL is missing.
pub const KEY_MANAGER_URL_KEY: &str = "authentication.key_manager_url";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URLs of the two authentication services.
    pub authentication: AuthenticationConfig,

    /// Pool and timeout bounds shared by every transport.
    pub transport: TransportConfig,

    /// Downstream services by name.
    pub services: BTreeMap<String, String>,
}

/// Base URLs of the identity services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Session Authentication Service base URL.
    pub session_manager_url: Option<String>,

    /// Key Manager Authentication Service base URL.
    pub key_manager_url: Option<String>,
}

/// Bounds applied when a context builds its pooled HTTPS transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds.
    pub read_timeout_ms: u64,

    /// Maximum in-flight requests per transport.
    pub max_connections: usize,

    /// Maximum pooled connections per host.
    pub max_connections_per_route: usize,
}

impl TransportConfig {
    /// Upper bound for the connect timeout.
    pub const MAX_CONNECT_TIMEOUT_MS: u64 = 30_000;
    /// Upper bound for the read timeout.
    pub const MAX_READ_TIMEOUT_MS: u64 = 120_000;
    /// Upper bound for total connections.
    pub const MAX_CONNECTIONS: usize = 500;
    /// Upper bound for connections per route.
    pub const MAX_CONNECTIONS_PER_ROUTE: usize = 100;

    /// Return a copy with every value clamped to `[1, MAX]`.
    ///
    /// The per-route bound never exceeds the total bound.
    pub fn clamped(&self) -> Self {
        let max_connections = self.max_connections.clamp(1, Self::MAX_CONNECTIONS);
        Self {
            connect_timeout_ms: self
                .connect_timeout_ms
                .clamp(1, Self::MAX_CONNECT_TIMEOUT_MS),
            read_timeout_ms: self.read_timeout_ms.clamp(1, Self::MAX_READ_TIMEOUT_MS),
            max_connections,
            max_connections_per_route: self
                .max_connections_per_route
                .clamp(1, Self::MAX_CONNECTIONS_PER_ROUTE)
                .min(max_connections),
        }
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            read_timeout_ms: 4_000,
            max_connections: 60,
            max_connections_per_route: 20,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Apply `INTEGRATION_AUTH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok());
    }

    /// Apply overrides from an arbitrary lookup keyed by the unprefixed name.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SESSION_MANAGER_URL") {
            self.authentication.session_manager_url = Some(url);
        }
        if let Some(url) = lookup("KEY_MANAGER_URL") {
            self.authentication.key_manager_url = Some(url);
        }

        if let Some(v) = lookup("CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.transport.connect_timeout_ms = v;
        }
        if let Some(v) = lookup("READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.transport.read_timeout_ms = v;
        }
        if let Some(v) = lookup("MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.transport.max_connections = v;
        }
        if let Some(v) = lookup("MAX_CONNECTIONS_PER_ROUTE").and_then(|v| v.parse().ok()) {
            self.transport.max_connections_per_route = v;
        }
    }

    /// Session Authentication Service URL, failing when absent or blank.
    pub fn session_manager_url(&self) -> Result<Url> {
        required_url(
            self.authentication.session_manager_url.as_deref(),
            SESSION_MANAGER_URL_KEY,
        )
    }

    /// Key Manager Authentication Service URL, failing when absent or blank.
    pub fn key_manager_url(&self) -> Result<Url> {
        required_url(
            self.authentication.key_manager_url.as_deref(),
            KEY_MANAGER_URL_KEY,
        )
    }
}

fn required_url(value: Option<&str>, key: &str) -> Result<Url> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => parse_url(key, raw),
        None => Err(Error::AuthUrlNotFound {
            key: key.to_string(),
        }),
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Configuration(format!("invalid URL for {}: {}", name, e)))
}

/// Resolves service names to base URLs.
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    services: BTreeMap<String, Url>,
}

impl ServiceDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from configuration.
    ///
    /// The authentication services are registered when configured; blank
    /// entries are skipped so they later resolve to "not found".
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut directory = Self::new();
        let auth = [
            (SESSION_AUTH_SERVICE, &config.authentication.session_manager_url),
            (KEY_MANAGER_AUTH_SERVICE, &config.authentication.key_manager_url),
        ];
        for (name, value) in auth {
            if let Some(raw) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                directory.insert(name, parse_url(name, raw)?);
            }
        }
        for (name, raw) in &config.services {
            let raw = raw.trim();
            if !raw.is_empty() {
                directory.insert(name.clone(), parse_url(name, raw)?);
            }
        }
        Ok(directory)
    }

    /// Register or replace a service.
    pub fn insert(&mut self, name: impl Into<String>, base_url: Url) {
        self.services.insert(name.into(), base_url);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_service(mut self, name: impl Into<String>, base_url: Url) -> Self {
        self.insert(name, base_url);
        self
    }

    /// Resolve a service's base URL.
    pub fn resolve(&self, service: &str) -> Result<&Url> {
        self.services
            .get(service)
            .ok_or_else(|| Error::ServiceUrlNotFound {
                service: service.to_string(),
            })
    }

    /// Whether the service is known.
    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Known service names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}
