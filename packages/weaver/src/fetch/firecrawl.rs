//! Firecrawl-based renderer.
//!
//! Uses the Firecrawl `/scrape` endpoint to render JavaScript-heavy pages
//! and return their raw post-render HTML.
//!
//! Requires the `firecrawl` feature to be enabled.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ApiKey;
use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{FetchedPage, HeaderSet, RenderRequest, RenderedFetcher};

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

/// Renders pages through the Firecrawl API.
///
/// # Example
///
/// ```rust,ignore
/// use weaver::fetch::FirecrawlRenderer;
///
/// let renderer = FirecrawlRenderer::new(std::env::var("FIRECRAWL_API_KEY")?);
/// let page = renderer.render(&RenderRequest::new("https://example.com")).await?;
/// ```
pub struct FirecrawlRenderer {
    client: Client,
    api_key: ApiKey,
    base_url: String,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 1],
    #[serde(rename = "waitFor", skip_serializing_if = "Option::is_none")]
    wait_for: Option<u64>,
    timeout: u64,
    #[serde(skip_serializing_if = "HeaderSet::is_empty")]
    headers: &'a HeaderSet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<Action<'a>>,
}

#[derive(Serialize)]
struct Action<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    selector: &'a str,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    #[serde(rename = "rawHtml")]
    raw_html: Option<String>,
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct PageMetadata {
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
}

impl FirecrawlRenderer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: ApiKey::new(api_key),
            base_url: FIRECRAWL_API_URL.to_string(),
        }
    }

    /// Point at a self-hosted Firecrawl instance.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn body<'a>(request: &'a RenderRequest) -> ScrapeRequest<'a> {
        ScrapeRequest {
            url: &request.url,
            formats: ["rawHtml"],
            wait_for: request.wait_time.map(|d| d.as_millis() as u64),
            timeout: request.timeout.as_millis() as u64,
            headers: &request.headers,
            actions: request
                .wait_selector
                .as_deref()
                .map(|selector| Action {
                    kind: "wait",
                    selector,
                })
                .into_iter()
                .collect(),
        }
    }
}

#[async_trait]
impl RenderedFetcher for FirecrawlRenderer {
    async fn render(&self, request: &RenderRequest) -> FetchResult<FetchedPage> {
        debug!(url = %request.url, "Firecrawl render starting");

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(self.api_key.expose())
            .timeout(request.timeout)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: request.url.clone(),
                    }
                } else {
                    FetchError::Http(Box::new(e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(url = %request.url, status = status.as_u16(), "Firecrawl API error");
            return Err(FetchError::Renderer(format!(
                "Firecrawl API error: {} - {}",
                status, text
            )));
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Http(Box::new(e)))?;

        if !body.success {
            return Err(FetchError::Renderer(
                body.error.unwrap_or_else(|| "scrape unsuccessful".to_string()),
            ));
        }

        let data = body
            .data
            .ok_or_else(|| FetchError::Renderer("response has no data".to_string()))?;
        let status = data
            .metadata
            .and_then(|m| m.status_code)
            .unwrap_or(200);
        let html = data
            .raw_html
            .ok_or_else(|| FetchError::Renderer("response has no rawHtml".to_string()))?;

        if !(200..300).contains(&status) {
            return Err(FetchError::Status {
                status,
                url: request.url.clone(),
            });
        }

        Ok(FetchedPage {
            url: request.url.clone(),
            status,
            html,
            headers: HeaderSet::new(),
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "firecrawl"
    }
}
