//! The call interface shared by every layer of the API client chain, and the
//! base client that puts requests on the wire.

use crate::auth::traits::TransportProvider;
use crate::error::{Error, Result, TransportError};
use crate::shared::http_utils::{
    default_loggable_content_types, default_sensitive_headers, format_headers_for_logging,
    redact_url_query, should_log_body_for_content_type,
};
use async_trait::async_trait;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Header carrying the session token.
pub const SESSION_TOKEN_HEADER: &str = "sessionToken";

/// Header carrying the key-manager token.
pub const KEY_MANAGER_TOKEN_HEADER: &str = "keyManagerToken";

const JSON: &str = "application/json";

/// An outbound API call.
#[derive(Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the service base URL.
    pub path: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Accept header value.
    pub accept: Option<String>,
    /// Content-Type of the body.
    pub content_type: Option<String>,
    /// Principal the call is made for, used to pick the transport and the token.
    pub principal: Option<String>,
}

impl ApiRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            accept: Some(JSON.to_string()),
            content_type: None,
            principal: None,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Make the call on behalf of `principal_id`.
    pub fn for_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal = Some(principal_id.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        self.content_type = Some(JSON.to_string());
        Ok(self)
    }

    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Set a header, replacing any value stored under a different case.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    /// Session token header, if any.
    pub fn session_token(&self) -> Option<&str> {
        self.header(SESSION_TOKEN_HEADER)
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field(
                "headers",
                &format_headers_for_logging(&self.headers, &default_sensitive_headers(), None),
            )
            .field("query", &self.query.len())
            .field("has_body", &self.body.is_some())
            .field("principal", &self.principal)
            .finish()
    }
}

/// A 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One layer of the API client chain.
///
/// Layers receive the request mutably so that headers set by inner layers
/// (tokens, trace id) are visible to outer layers once the call returns.
///
/// A non-2xx response is reported as [`Error::Api`]; a transport fault as
/// [`Error::Transport`] or, once translated, [`Error::Connectivity`].
#[async_trait]
pub trait HttpApiClient: Send + Sync {
    /// Perform the call.
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse>;
}

#[async_trait]
impl<T: HttpApiClient + ?Sized> HttpApiClient for Arc<T> {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        (**self).invoke(request).await
    }
}

/// Typed convenience calls available on every client.
#[async_trait]
pub trait HttpApiClientExt: HttpApiClient {
    /// `GET path` for `principal_id`, decoding a JSON response.
    async fn get_json<R>(&self, principal_id: &str, path: &str) -> Result<R>
    where
        R: DeserializeOwned + Send,
    {
        let mut request = ApiRequest::get(path).for_principal(principal_id);
        self.invoke(&mut request).await?.json()
    }

    /// `POST path` with a JSON body, decoding a JSON response.
    async fn post_json<B, R>(&self, principal_id: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let mut request = ApiRequest::post(path)
            .for_principal(principal_id)
            .with_json(body)?;
        self.invoke(&mut request).await?.json()
    }

    /// `PUT path` with a JSON body, decoding a JSON response.
    async fn put_json<B, R>(&self, principal_id: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let mut request = ApiRequest::put(path)
            .for_principal(principal_id)
            .with_json(body)?;
        self.invoke(&mut request).await?.json()
    }

    /// `DELETE path`, discarding the response body.
    async fn delete(&self, principal_id: &str, path: &str) -> Result<()> {
        let mut request = ApiRequest::delete(path).for_principal(principal_id);
        self.invoke(&mut request).await.map(|_| ())
    }
}

impl<T: HttpApiClient + ?Sized> HttpApiClientExt for T {}

/// Innermost layer: sends the request over the pooled transport of the
/// principal it belongs to.
///
/// The transport is chosen by the request's principal, or failing that by
/// the principal owning its session token.
pub struct ReqwestApiClient {
    service: String,
    transports: Arc<dyn TransportProvider>,
}

impl ReqwestApiClient {
    /// Create a base client for `service`.
    pub fn new(service: impl Into<String>, transports: Arc<dyn TransportProvider>) -> Self {
        Self {
            service: service.into(),
            transports,
        }
    }

    /// Service this client targets.
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Debug for ReqwestApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestApiClient")
            .field("service", &self.service)
            .finish()
    }
}

#[async_trait]
impl HttpApiClient for ReqwestApiClient {
    async fn invoke(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        let transport = match (&request.principal, request.session_token()) {
            (Some(principal), _) => self
                .transports
                .transport_for_principal(principal, &self.service)?,
            (None, Some(session_token)) => self
                .transports
                .transport_for_session_token(session_token, &self.service)?,
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "request names neither a principal nor a session token".to_string(),
                ))
            },
        };

        let url = transport.url_for(&request.path, &request.query)?;
        debug!(
            service = %self.service,
            method = %request.method,
            url = %redact_url_query(url.as_str()),
            "Sending request"
        );
        let _permit = transport.acquire().await?;

        let mut builder = transport.client().request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(accept) = &request.accept {
            builder = builder.header(http::header::ACCEPT, accept.as_str());
        }
        if let Some(body) = &request.body {
            let content_type = request.content_type.as_deref().unwrap_or(JSON);
            builder = builder
                .header(http::header::CONTENT_TYPE, content_type)
                .body(serde_json::to_vec(body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::from(e)))?;

        let status = response.status();
        let text_body = should_log_body_for_content_type(
            response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            &default_loggable_content_types(),
        );
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(TransportError::from(e)))?
            .to_vec();

        debug!(
            service = %self.service,
            status = status.as_u16(),
            bytes = body.len(),
            "Received response"
        );

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unexpected status");
            let text = Some(String::from_utf8_lossy(&body).into_owned())
                .filter(|t| text_body && !t.trim().is_empty());
            return Err(Error::Api {
                status: status.as_u16(),
                message: reason.to_string(),
                body: text,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
