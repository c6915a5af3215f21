//! Error types for the credential and session layer.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants are
//! grouped the way callers need to react to them:
//!
//! - configuration errors (`AuthUrlNotFound`, `ServiceUrlNotFound`, `Certificate`,
//!   `Configuration`) are fatal at startup and never retried
//! - connectivity errors (`Connectivity`) carry the service that could not be
//!   reached and the transport fault behind it
//! - API errors (`Api`) carry the HTTP status of a non-2xx response
//! - authentication errors (`UnregisteredPrincipal`, `UnexpectedAuth`) end the
//!   current call

use std::fmt;
use thiserror::Error;

/// Boxed error used as the source of transport faults.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Upstream service a connectivity failure is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Session Authentication Service.
    SessionAuth,
    /// Key Manager Authentication Service.
    KeyManagerAuth,
    /// Any other downstream service, by configured name.
    Downstream(String),
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionAuth => f.write_str("Session Authentication Service"),
            Self::KeyManagerAuth => f.write_str("Key Manager Authentication Service"),
            Self::Downstream(name) => write!(f, "{} service", name),
        }
    }
}

/// Classification of a transport-level fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TCP/TLS connection could not be established (refused, DNS, handshake).
    Connect,
    /// Connect or read timeout elapsed.
    Timeout,
    /// Connection dropped or failed while sending or receiving.
    Io,
    /// Request could not be built or the response could not be decoded.
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connection failed",
            Self::Timeout => "timed out",
            Self::Io => "I/O failure",
            Self::Protocol => "protocol error",
        };
        f.write_str(name)
    }
}

/// A failure below the HTTP layer: no status code was received.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Create a transport error without an underlying source.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Shorthand for a refused or unreachable connection.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    /// Shorthand for an elapsed timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// The fault classification.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The fault description, without the classification.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this fault is an I/O failure reaching the peer.
    ///
    /// Only I/O failures are translated into connectivity errors; protocol
    /// errors are reported as they are.
    pub fn is_io(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Protocol)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_request() || err.is_body() {
            TransportErrorKind::Io
        } else {
            TransportErrorKind::Protocol
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotConnected => {
                TransportErrorKind::Connect
            },
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// Errors produced by the authentication proxy and the API client chain.
#[derive(Debug, Error)]
pub enum Error {
    /// An authentication service base URL is not configured.
    #[error("Verify the configuration file. No configuration found to the key {key}")]
    AuthUrlNotFound {
        /// The configuration key that is missing.
        key: String,
    },

    /// A downstream service base URL is not configured.
    #[error("Verify the configuration file. No base URL configured for service '{service}'")]
    ServiceUrlNotFound {
        /// The service name that could not be resolved.
        service: String,
    },

    /// Client certificate material could not be loaded.
    #[error("Unusable client certificate for principal '{principal}': {reason}")]
    Certificate {
        /// The principal the certificate was registered for.
        principal: String,
        /// Why the certificate was rejected.
        reason: String,
    },

    /// Any other configuration problem.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A transport fault not yet attributed to a service.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A service could not be reached.
    #[error("Failed to reach the {service}")]
    Connectivity {
        /// The service that could not be reached.
        service: ServiceKind,
        /// The transport fault behind it.
        #[source]
        source: TransportError,
    },

    /// The upstream answered with a non-2xx status.
    #[error("API call failed with status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Short message, usually the response body.
        message: String,
        /// Raw response body, if any was read.
        body: Option<String>,
    },

    /// A principal or session token is not known to the proxy.
    #[error("{message}")]
    UnregisteredPrincipal {
        /// What was not found.
        message: String,
        /// Suggested remediation.
        solution: String,
    },

    /// Re-authentication was refused or failed; the call cannot continue.
    #[error("{message}")]
    UnexpectedAuth {
        /// Description of the failure.
        message: String,
        /// The error that triggered the re-authentication.
        #[source]
        source: Box<Error>,
    },

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build an API error from a status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Build an unexpected-auth error wrapping the triggering cause.
    pub fn unexpected_auth(message: impl Into<String>, cause: Error) -> Self {
        Self::UnexpectedAuth {
            message: message.into(),
            source: Box::new(cause),
        }
    }

    /// Build an unregistered-principal error.
    pub fn unregistered(message: impl Into<String>, solution: impl Into<String>) -> Self {
        Self::UnregisteredPrincipal {
            message: message.into(),
            solution: solution.into(),
        }
    }

    /// HTTP status carried by an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a connectivity error.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    /// Attribute an I/O transport fault to `service`.
    ///
    /// Protocol faults and every other variant are returned unchanged.
    pub fn into_connectivity(self, service: ServiceKind) -> Self {
        match self {
            Self::Transport(source) if source.is_io() => Self::Connectivity { service, source },
            other => other,
        }
    }
}
