//! Fetch capability traits.
//!
//! Two transports sit below the fallback controller: a cheap one that
//! returns server markup as-is, and a rendering-capable one that executes
//! page scripts first. Both consume browser-like headers from a
//! [`UserAgentProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use reqwest::Method;
use serde::Serialize;
use std::time::Duration;

use crate::error::FetchResult;

/// Ordered header name/value pairs.
pub type HeaderSet = IndexMap<String, String>;

/// HTML returned by either transport.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    /// Requested URL
    pub url: String,

    /// HTTP status (200 for rendered pages)
    pub status: u16,

    pub html: String,

    /// Response headers, lower-cased names
    pub headers: HeaderSet,

    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            html: html.into(),
            headers: HeaderSet::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// HTML length in characters.
    pub fn char_len(&self) -> usize {
        self.html.chars().count()
    }
}

/// Request for the cheap transport.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderSet,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderSet::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Request for the rendering-capable transport.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,

    /// CSS selector to wait for before capturing markup
    pub wait_selector: Option<String>,

    /// Fixed settle time after load
    pub wait_time: Option<Duration>,

    pub headers: HeaderSet,
    pub timeout: Duration,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait_selector: None,
            wait_time: None,
            headers: HeaderSet::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_wait_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_selector = Some(selector.into());
        self
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = Some(wait);
        self
    }

    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Cheap transport: no rendering, no script execution.
#[async_trait]
pub trait CheapFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage>;

    /// Fetcher name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Rendering-capable transport: executes page scripts before returning markup.
#[async_trait]
pub trait RenderedFetcher: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> FetchResult<FetchedPage>;

    /// Renderer name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Source of browser-like request headers.
///
/// Whether successive calls return the same identity or rotate is up to
/// the implementation.
pub trait UserAgentProvider: Send + Sync {
    fn headers(&self) -> HeaderSet;
}

#[async_trait]
impl<T: CheapFetcher + ?Sized> CheapFetcher for std::sync::Arc<T> {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        (**self).fetch(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: RenderedFetcher + ?Sized> RenderedFetcher for std::sync::Arc<T> {
    async fn render(&self, request: &RenderRequest) -> FetchResult<FetchedPage> {
        (**self).render(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: UserAgentProvider + ?Sized> UserAgentProvider for std::sync::Arc<T> {
    fn headers(&self) -> HeaderSet {
        (**self).headers()
    }
}
