//! HTTP plumbing shared by the token exchange and the REST client.
//!
//! [`Transport`] is the seam: production code talks to the backend through
//! [`HttpTransport`], tests substitute scripted responses.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One request against the backend, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::Get,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::Delete,
            ..ApiRequest::get(path)
        }
    }

    /// Request with a JSON body. Serialization failures leave the body empty.
    pub fn with_json<T: Serialize>(method: Method, path: impl Into<String>, body: &T) -> Self {
        let body = match serde_json::to_value(body) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("could not encode request body: {}", e);
                None
            }
        };
        ApiRequest {
            method,
            path: path.into(),
            bearer: None,
            body,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::Post,
            ..ApiRequest::get(path)
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }
}

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        ApiResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Human-readable error: JSON `detail` or `message`, else the raw
    /// body, else the status line.
    pub fn error_message(&self) -> String {
        if let Some(json) = self.json() {
            for key in ["detail", "message"] {
                match json.get(key) {
                    Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                    Some(other) if !other.is_null() => return other.to_string(),
                    _ => {}
                }
            }
        }
        let text = self.body.trim();
        if text.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            text.to_string()
        }
    }
}

/// Failure before any HTTP status was received.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("could not build http client: {0}")]
    Build(reqwest::Error),
    #[error("connection failed: {0}")]
    Connection(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Build)?;
        Ok(HttpTransport { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        log::debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
            Method::Put => self.client.put(url.clone()),
            Method::Patch => self.client.patch(url.clone()),
            Method::Delete => self.client.delete(url.clone()),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            source: e,
        })?;
        log::debug!("{} {} -> {}", request.method, url, status);
        Ok(ApiResponse { status, body })
    }
}
