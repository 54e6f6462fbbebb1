//! Fetch fallback controller.
//!
//! Decides per URL whether the cheap transport is enough or the page needs
//! the rendering-capable one. Each request is a small state machine:
//!
//! ```text
//! NOT_FETCHED ──cheap ok, sufficient──────▶ FAST_OK
//! NOT_FETCHED ──cheap ok, insufficient────▶ FAST_INSUFFICIENT
//! NOT_FETCHED ──rendering requested───────▶ FAST_INSUFFICIENT
//! FAST_OK ─────empty extraction───────────▶ FAST_INSUFFICIENT
//! FAST_INSUFFICIENT ──rendered ok─────────▶ RENDERED_OK
//! any fetch ───transport fault────────────▶ FAILED
//! ```
//!
//! Transport faults are never retried here; only insufficiency escalates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::agents::RotatingAgents;
use super::rate_limited::RateLimitedFetcher;
use super::sufficiency::{Insufficiency, SufficiencyCheck};
use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError, FetchResult};
use crate::traits::fetcher::{
    CheapFetcher, FetchRequest, FetchedPage, RenderRequest, RenderedFetcher, UserAgentProvider,
};

/// Per-request fetch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchState {
    NotFetched,
    FastOk,
    FastInsufficient,
    RenderedOk,
    Failed,
}

impl FetchState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: FetchState) -> bool {
        use FetchState::*;
        matches!(
            (self, next),
            (NotFetched, FastOk | FastInsufficient | Failed)
                | (FastOk, FastInsufficient)
                | (FastInsufficient, RenderedOk | Failed)
        )
    }

    /// HTML in this state may be handed to extraction.
    pub fn is_success(self) -> bool {
        matches!(self, FetchState::FastOk | FetchState::RenderedOk)
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchState::NotFetched => "NOT_FETCHED",
            FetchState::FastOk => "FAST_OK",
            FetchState::FastInsufficient => "FAST_INSUFFICIENT",
            FetchState::RenderedOk => "RENDERED_OK",
            FetchState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: FetchState,
    pub to: FetchState,
    pub reason: String,
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Skip the cheap path and render straight away
    pub use_browser: bool,

    /// Escalate insufficient pages to the renderer
    pub auto_fallback: bool,

    /// Overrides both transport timeouts
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_browser: false,
            auto_fallback: true,
            timeout: None,
        }
    }
}

impl FetchOptions {
    pub fn with_browser(mut self, use_browser: bool) -> Self {
        self.use_browser = use_browser;
        self
    }

    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final result of a fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub url: String,
    pub html: String,
    pub state: FetchState,
    pub transitions: Vec<Transition>,

    /// Why the cheap page was judged insufficient, if it was
    pub insufficiency: Option<Insufficiency>,
}

impl FetchOutcome {
    pub fn rendered(&self) -> bool {
        self.state == FetchState::RenderedOk
    }
}

/// Chooses and escalates transports.
pub struct FetchFallbackController {
    cheap: Arc<dyn CheapFetcher>,
    renderer: Option<Arc<dyn RenderedFetcher>>,
    agents: Arc<dyn UserAgentProvider>,
    sufficiency: SufficiencyCheck,
    config: FetchConfig,
}

impl FetchFallbackController {
    /// Create a controller over a cheap fetcher.
    ///
    /// Applies `config.requests_per_second` as a rate limit on the cheap
    /// path. Uses sticky desktop user agents until [`with_agents`](Self::with_agents).
    pub fn new(cheap: impl CheapFetcher + 'static, config: FetchConfig) -> Result<Self, ConfigError> {
        let cheap: Arc<dyn CheapFetcher> = match config.requests_per_second {
            Some(rps) => Arc::new(RateLimitedFetcher::new(cheap, rps)?),
            None => Arc::new(cheap),
        };

        Ok(Self {
            cheap,
            renderer: None,
            agents: Arc::new(RotatingAgents::desktop()),
            sufficiency: SufficiencyCheck::new(&config.sufficiency),
            config,
        })
    }

    pub fn with_renderer(mut self, renderer: impl RenderedFetcher + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_agents(mut self, agents: impl UserAgentProvider + 'static) -> Self {
        self.agents = Arc::new(agents);
        self
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Start a fetch session for one URL.
    pub fn session(&self, url: impl Into<String>, options: FetchOptions) -> FetchSession<'_> {
        FetchSession {
            controller: self,
            url: url.into(),
            options,
            state: FetchState::NotFetched,
            transitions: Vec::new(),
            html: None,
            insufficiency: None,
        }
    }

    /// Run a session to completion.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> FetchResult<FetchOutcome> {
        let mut session = self.session(url, options);
        session.run().await?;
        session.into_outcome()
    }
}

impl fmt::Debug for FetchFallbackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFallbackController")
            .field("cheap", &self.cheap.name())
            .field("renderer", &self.renderer.as_ref().map(|r| r.name()))
            .field("config", &self.config)
            .finish()
    }
}

/// State machine for one URL.
pub struct FetchSession<'a> {
    controller: &'a FetchFallbackController,
    url: String,
    options: FetchOptions,
    state: FetchState,
    transitions: Vec<Transition>,
    html: Option<String>,
    insufficiency: Option<Insufficiency>,
}

impl<'a> FetchSession<'a> {
    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// HTML to hand to extraction, once fetched.
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn insufficiency(&self) -> Option<&Insufficiency> {
        self.insufficiency.as_ref()
    }

    /// Drive the session from `NOT_FETCHED` to a resting state.
    ///
    /// Ends in `FAST_OK` or `RENDERED_OK` on success, or in
    /// `FAST_INSUFFICIENT` when the page is insufficient but rendering is
    /// off or unavailable (the cheap HTML is kept). Transport faults move
    /// to `FAILED` and are returned.
    #[instrument(skip(self), fields(url = %self.url, use_browser = self.options.use_browser))]
    pub async fn run(&mut self) -> FetchResult<()> {
        if self.state != FetchState::NotFetched {
            return Ok(());
        }

        if self.options.use_browser {
            self.transition(FetchState::FastInsufficient, "rendering requested");
            return self.render().await;
        }

        let request = FetchRequest::get(self.url.clone())
            .with_headers(self.controller.agents.headers())
            .with_timeout(self.cheap_timeout());

        let fetched = self
            .bounded(request.timeout, self.controller.cheap.fetch(&request))
            .await;
        let page = match fetched {
            Ok(page) => page,
            Err(e) => return Err(self.fail(e)),
        };

        match self.controller.sufficiency.check(&page.html) {
            Ok(()) => {
                info!(chars = page.char_len(), "Cheap fetch sufficient");
                self.html = Some(page.html);
                self.transition(FetchState::FastOk, "cheap fetch sufficient");
                Ok(())
            }
            Err(reason) => {
                let kind = reason.kind();
                info!(%reason, %kind, "Cheap fetch insufficient");
                self.html = Some(page.html);
                self.transition(FetchState::FastInsufficient, reason.to_string());
                self.insufficiency = Some(reason);
                self.fall_back().await
            }
        }
    }

    /// Escalate a `FAST_OK` page after an empty extraction.
    ///
    /// Returns `Ok(true)` when rendered HTML replaced the cheap HTML,
    /// `Ok(false)` when escalation is off or impossible.
    pub async fn escalate(&mut self, reason: &str) -> FetchResult<bool> {
        if self.state != FetchState::FastOk
            || !self.options.auto_fallback
            || !self.controller.has_renderer()
        {
            return Ok(false);
        }

        self.transition(FetchState::FastInsufficient, reason);
        self.render().await?;
        Ok(true)
    }

    /// Final outcome; fails unless HTML was obtained.
    pub fn into_outcome(self) -> FetchResult<FetchOutcome> {
        let html = self.html.ok_or_else(|| FetchError::Renderer(format!(
            "no HTML obtained (state {})",
            self.state
        )))?;

        Ok(FetchOutcome {
            url: self.url,
            html,
            state: self.state,
            transitions: self.transitions,
            insufficiency: self.insufficiency,
        })
    }

    async fn fall_back(&mut self) -> FetchResult<()> {
        if !self.options.auto_fallback {
            warn!("Page looks JS-gated but auto fallback is off, using cheap HTML");
            return Ok(());
        }
        if !self.controller.has_renderer() {
            warn!("Page looks JS-gated but no renderer is configured, using cheap HTML");
            return Ok(());
        }
        self.render().await
    }

    async fn render(&mut self) -> FetchResult<()> {
        let Some(renderer) = self.controller.renderer.clone() else {
            return Err(self.fail(FetchError::RendererUnavailable));
        };

        let config = &self.controller.config;
        let mut request = RenderRequest::new(self.url.clone())
            .with_headers(self.controller.agents.headers())
            .with_timeout(self.render_timeout());
        request.wait_time = config.wait_time;
        request.wait_selector = config.wait_selector.clone();

        debug!(renderer = renderer.name(), "Rendering page");
        let rendered = self.bounded(request.timeout, renderer.render(&request)).await;
        let page = match rendered {
            Ok(page) => page,
            Err(e) => return Err(self.fail(e)),
        };

        info!(chars = page.char_len(), "Rendered fetch finished");
        self.html = Some(page.html);
        self.transition(FetchState::RenderedOk, "rendered fetch succeeded");
        Ok(())
    }

    /// Enforce the caller's timeout on any transport call.
    async fn bounded<F>(&self, timeout: Duration, call: F) -> FetchResult<FetchedPage>
    where
        F: Future<Output = FetchResult<FetchedPage>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: self.url.clone(),
            }),
        }
    }

    fn fail(&mut self, error: FetchError) -> FetchError {
        warn!(url = %self.url, error = %error, "Fetch failed");
        self.transition(FetchState::Failed, error.to_string());
        error
    }

    fn transition(&mut self, to: FetchState, reason: impl Into<String>) {
        let from = self.state;
        debug_assert!(
            from.can_transition_to(to),
            "illegal fetch transition {} -> {}",
            from,
            to
        );
        let reason = reason.into();
        debug!(%from, %to, %reason, "Fetch state transition");
        self.transitions.push(Transition { from, to, reason });
        self.state = to;
    }

    fn cheap_timeout(&self) -> Duration {
        self.options.timeout.unwrap_or(self.controller.config.timeout)
    }

    fn render_timeout(&self) -> Duration {
        self.options
            .timeout
            .unwrap_or(self.controller.config.render_timeout)
    }
}
