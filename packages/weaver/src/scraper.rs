//! High-level scraper: fetch with fallback, then extract.
//!
//! [`Scraper`] wires a [`FetchFallbackController`] to a [`Weaver`]. One
//! `scrape` call is a sequential pipeline (fetch, fallback decision,
//! extraction); `scrape_many` overlaps the fetch stage across URLs while
//! every model call still goes through the shared [`InferenceHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use weaver::{Scraper, ScraperConfig, ScrapeOptions, SchemaDescriptor, FieldType};
//!
//! let scraper = Scraper::from_config(ScraperConfig::from_env()?)?;
//! let schema = SchemaDescriptor::builder()
//!     .required("title", FieldType::String, "Product title")
//!     .optional("price", FieldType::Float, "Price in dollars")
//!     .build()?;
//!
//! let response = scraper
//!     .scrape("https://shop.example.com/lamp", &schema, &ScrapeOptions::default())
//!     .await?;
//! println!("{}", response);
//! ```

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::ScraperConfig;
use crate::error::{Result, WeaverError};
use crate::fetch::{FetchFallbackController, FetchOptions, FetchOutcome, FetchState, HttpFetcher};
use crate::inference::InferenceHandle;
use crate::orchestrator::Weaver;
use crate::response::{ScrapeResponse, ScrapeResult};
use crate::schema::SchemaDescriptor;
use crate::traits::fetcher::{CheapFetcher, RenderedFetcher, UserAgentProvider};

/// Per-call options for [`Scraper::scrape`].
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Extra guidance appended to the extraction prompt
    pub instructions: Option<String>,

    /// Skip the cheap fetch and render straight away
    pub use_browser: bool,

    /// Overrides `ScraperConfig::auto_fallback` for this call
    pub auto_fallback: Option<bool>,

    /// Overrides the transport timeouts for this call
    pub timeout: Option<Duration>,

    /// Write the HTML handed to extraction to this file
    pub save_html: Option<PathBuf>,

    /// Overrides `ScraperConfig::concurrency` for one `scrape_many` call
    pub concurrency: Option<usize>,
}

impl ScrapeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_browser(mut self, use_browser: bool) -> Self {
        self.use_browser = use_browser;
        self
    }

    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = Some(enabled);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_save_html(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_html = Some(path.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Fetch-then-extract facade.
#[derive(Debug)]
pub struct Scraper {
    weaver: Weaver,
    controller: FetchFallbackController,
    config: ScraperConfig,
}

/// Builder for [`Scraper`].
pub struct ScraperBuilder {
    handle: InferenceHandle,
    config: ScraperConfig,
    fetcher: Option<Arc<dyn CheapFetcher>>,
    renderer: Option<Arc<dyn RenderedFetcher>>,
    agents: Option<Arc<dyn UserAgentProvider>>,
}

impl ScraperBuilder {
    pub fn config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    /// Cheap transport (default: [`HttpFetcher`]).
    pub fn fetcher(mut self, fetcher: impl CheapFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Rendering-capable transport. Without one, JS-gated pages degrade to
    /// their cheap HTML.
    pub fn renderer(mut self, renderer: impl RenderedFetcher + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn agents(mut self, agents: impl UserAgentProvider + 'static) -> Self {
        self.agents = Some(Arc::new(agents));
        self
    }

    pub fn build(self) -> Result<Scraper> {
        self.config.validate()?;

        let weaver = Weaver::new(self.handle, self.config.weaver.clone())?;
        let fetcher: Arc<dyn CheapFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?),
        };

        let mut controller = FetchFallbackController::new(fetcher, self.config.fetch.clone())?;
        if let Some(renderer) = self.renderer {
            controller = controller.with_renderer(renderer);
        }
        if let Some(agents) = self.agents {
            controller = controller.with_agents(agents);
        }

        Ok(Scraper {
            weaver,
            controller,
            config: self.config,
        })
    }
}

impl Scraper {
    /// Start building a scraper around an inference handle.
    pub fn builder(handle: InferenceHandle) -> ScraperBuilder {
        ScraperBuilder {
            handle,
            config: ScraperConfig::default(),
            fetcher: None,
            renderer: None,
            agents: None,
        }
    }

    /// Scraper backed by an OpenAI-compatible server, plus Firecrawl
    /// rendering when the `firecrawl` feature is on and a key is set.
    #[cfg(feature = "openai")]
    pub fn from_config(config: ScraperConfig) -> Result<Self> {
        let handle = InferenceHandle::new(crate::generators::OpenAiGenerator::from_config(&config));
        let builder = Self::builder(handle);

        #[cfg(feature = "firecrawl")]
        let builder = match &config.firecrawl_api_key {
            Some(key) => builder.renderer(crate::fetch::FirecrawlRenderer::new(key.expose())),
            None => builder,
        };

        builder.config(config).build()
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn weaver(&self) -> &Weaver {
        &self.weaver
    }

    /// Fetch `url` and extract one record matching `schema`.
    ///
    /// When the cheap page was judged sufficient but extraction failed or
    /// came back mostly empty, the page is re-fetched through the renderer
    /// and extracted again; the more complete result wins, rendered on ties.
    #[instrument(skip(self, url, schema, options), fields(url = %url))]
    pub async fn scrape(
        &self,
        url: &str,
        schema: &SchemaDescriptor,
        options: &ScrapeOptions,
    ) -> Result<ScrapeResponse> {
        let fetch_options = self.fetch_options(options);
        let auto_fallback = fetch_options.auto_fallback;
        let instructions = options.instructions.as_deref();
        let save_path = options.save_html.as_deref();

        let mut session = self.controller.session(url, fetch_options);
        session.run().await?;
        let first_state = session.state();

        let cheap_html = session.html().unwrap_or_default().to_string();
        let first = self.weaver.extract(&cheap_html, schema, instructions).await;

        let escalated = if first_state == FetchState::FastOk
            && auto_fallback
            && self.should_escalate(&first)
        {
            info!("Cheap extraction came back empty, re-fetching with renderer");
            match session.escalate("extraction came back empty").await {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!(error = %e, "Rendered re-fetch failed, keeping cheap result");
                    false
                }
            }
        } else {
            false
        };

        if !escalated {
            save_html(save_path, &cheap_html).await?;
            return first.map(|result| self.respond(url, first_state, result, save_path));
        }

        let rendered_html = session.html().unwrap_or_default().to_string();
        let second = self.weaver.extract(&rendered_html, schema, instructions).await;
        let rendered_state = session.state();

        // Only the HTML behind the returned record is saved
        let (chosen, html) = match (first, second) {
            (Ok(cheap), Ok(rendered)) => {
                debug!(
                    cheap = cheap.completeness,
                    rendered = rendered.completeness,
                    "Comparing cheap and rendered results"
                );
                if rendered.completeness >= cheap.completeness {
                    (Ok((rendered_state, rendered)), &rendered_html)
                } else {
                    (Ok((first_state, cheap)), &cheap_html)
                }
            }
            (Ok(cheap), Err(e)) => {
                warn!(error = %e, "Extraction from rendered HTML failed, keeping cheap result");
                (Ok((first_state, cheap)), &cheap_html)
            }
            (Err(_), Ok(rendered)) => (Ok((rendered_state, rendered)), &rendered_html),
            (Err(_), Err(e)) => (Err(e), &rendered_html),
        };

        save_html(save_path, html).await?;
        chosen.map(|(state, result)| self.respond(url, state, result, save_path))
    }

    /// Scrape several URLs, fetching up to `concurrency` at a time
    /// (`options.concurrency`, else the configured bound).
    ///
    /// Results are in input order. `save_html` is ignored here.
    pub async fn scrape_many<S: AsRef<str>>(
        &self,
        urls: &[S],
        schema: &SchemaDescriptor,
        options: &ScrapeOptions,
    ) -> Vec<(String, Result<ScrapeResponse>)> {
        let options = ScrapeOptions {
            save_html: None,
            ..options.clone()
        };
        let options = &options;
        let concurrency = options.concurrency.unwrap_or(self.config.concurrency).max(1);

        info!(urls = urls.len(), concurrency, "Scraping batch");

        stream::iter(urls.iter().map(|url| url.as_ref().to_string()))
            .map(|url| async move {
                let result = self.scrape(&url, schema, options).await;
                if let Err(e) = &result {
                    warn!(url = %url, error = %e, "Batch scrape failed");
                }
                (url, result)
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Fetch only; no extraction.
    pub async fn fetch_html(&self, url: &str, options: &ScrapeOptions) -> Result<FetchOutcome> {
        let outcome = self.controller.fetch(url, self.fetch_options(options)).await?;
        save_html(options.save_html.as_deref(), &outcome.html).await?;
        Ok(outcome)
    }

    /// Extract from HTML the caller already has.
    pub async fn extract_from_html(
        &self,
        html: &str,
        schema: &SchemaDescriptor,
        instructions: Option<&str>,
    ) -> Result<ScrapeResponse> {
        let result = self.weaver.extract(html, schema, instructions).await?;
        Ok(ScrapeResponse::new(result))
    }

    /// Extract from several HTML documents, one at a time, in input order.
    pub async fn extract_batch<S: AsRef<str>>(
        &self,
        documents: &[S],
        schema: &SchemaDescriptor,
        instructions: Option<&str>,
    ) -> Vec<Result<ScrapeResponse>> {
        self.weaver
            .extract_batch(documents, schema, instructions)
            .await
            .into_iter()
            .map(|result| result.map(ScrapeResponse::new))
            .collect()
    }

    /// Free-form question about a page; returns the raw model text.
    pub async fn analyze_html(&self, html: &str, prompt: &str, temperature: Option<f32>) -> Result<String> {
        self.weaver.analyze(html, prompt, temperature).await
    }

    /// Tear down the inference backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.weaver.handle().shutdown().await?;
        Ok(())
    }

    fn fetch_options(&self, options: &ScrapeOptions) -> FetchOptions {
        FetchOptions {
            use_browser: options.use_browser,
            auto_fallback: options.auto_fallback.unwrap_or(self.config.auto_fallback),
            timeout: options.timeout,
        }
    }

    fn should_escalate(&self, result: &Result<ScrapeResult>) -> bool {
        if !self.controller.has_renderer() {
            return false;
        }
        match result {
            Ok(result) => result.empty_ratio() >= self.config.empty_ratio_threshold,
            Err(WeaverError::ExtractionFailed { .. } | WeaverError::EmptyDocument) => true,
            Err(_) => false,
        }
    }

    fn respond(
        &self,
        url: &str,
        state: FetchState,
        result: ScrapeResult,
        save_path: Option<&Path>,
    ) -> ScrapeResponse {
        ScrapeResponse::new(result)
            .with_source(url, state)
            .with_html_path(save_path.map(Path::to_path_buf))
    }
}

async fn save_html(path: Option<&Path>, html: &str) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, html).await?;
    debug!(path = %path.display(), bytes = html.len(), "Saved HTML");
    Ok(())
}
