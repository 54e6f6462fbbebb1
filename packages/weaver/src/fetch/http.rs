//! Cheap HTTP transport.
//!
//! Plain reqwest: no JavaScript rendering, so JS-gated pages come back as
//! placeholders and the fallback controller escalates them.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{CheapFetcher, FetchRequest, FetchedPage, HeaderSet};

/// Redirects followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// reqwest-backed cheap fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with browser-like defaults.
    pub fn new() -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(
            reqwest::header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Http(Box::new(e)))?;

        Ok(Self { client })
    }

    /// Use a custom HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_header_map(headers: &HeaderSet) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid request header"),
        }
    }
    map
}

#[async_trait]
impl CheapFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        let url = Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl {
            url: request.url.clone(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: request.url.clone(),
            });
        }

        debug!(url = %request.url, method = %request.method, "HTTP fetch starting");
        let response = self
            .client
            .request(request.method.clone(), url)
            .headers(to_header_map(&request.headers))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %request.url, error = %e, "HTTP request failed");
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: request.url.clone(),
                    }
                } else {
                    FetchError::Http(Box::new(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let headers: HeaderSet = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: request.url.clone(),
                }
            } else {
                FetchError::Http(Box::new(e))
            }
        })?;

        debug!(url = %request.url, status = status.as_u16(), bytes = html.len(), "HTTP fetch finished");

        Ok(FetchedPage {
            url: request.url.clone(),
            status: status.as_u16(),
            html,
            headers,
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
