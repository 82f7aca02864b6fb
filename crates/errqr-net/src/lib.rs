//! # errqr Net
//!
//! HTTP request/response model and network fetching for errqr.
//!
//! ## Design Goals
//!
//! 1. **Plain data**: `Request` and `Response` are cloneable values with fully
//!    buffered bodies, so a response can be handed to a page and stored in a
//!    cache at the same time.
//! 2. **One seam**: everything that needs the network goes through the
//!    [`Fetch`] trait, which tests replace with scripted fakes.
//! 3. **Transport errors only**: an HTTP error status is a response, not an
//!    error. `Err` means the request never completed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use errqr_common::ErrqrError;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ErrqrError {
    fn from(err: NetError) -> Self {
        ErrqrError::network_with_source("fetch failed", err)
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as set by the page that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load (address bar, link click, reload).
    Navigate,
    /// Sub-resource load (script, style, image, manifest).
    #[default]
    NoCors,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Navigate => "navigate",
            RequestMode::NoCors => "no-cors",
        }
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request for a sub-resource.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
        }
    }

    /// Create a GET request that loads a top-level document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether this request loads a top-level document.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// HTTP response with a buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, if the response came from a real request.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Build a response with the canonical reason phrase for `status`.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The synthetic response returned when an asset is unreachable.
    pub fn gateway_timeout() -> Self {
        Self {
            status_text: "Gateway Timeout".to_string(),
            ..Self::new(StatusCode::GATEWAY_TIMEOUT, Bytes::new())
        }
    }

    /// Set the response URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get content-type from headers.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can put a request on the wire.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform the request. `Err` only when no response was received.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Build a reqwest client from loader settings.
pub(crate) fn build_client(config: &LoaderConfig) -> Result<Client, NetError> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(connect_timeout) = config.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    let client = builder
        .build()
        .map_err(|e| NetError::RequestFailed(e.to_string()))?;

    info!(user_agent = %config.user_agent, "HTTP client initialized");
    debug!(
        timeout = ?config.timeout,
        connect_timeout = ?config.connect_timeout,
        max_redirects = config.max_redirects,
        "Client limits"
    );

    Ok(client)
}
