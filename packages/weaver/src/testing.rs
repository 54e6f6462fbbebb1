//! Testing utilities including mock implementations.
//!
//! Deterministic stand-ins for every external capability, useful for
//! testing applications that use the weaver library without making real
//! model or network calls. All mocks record their calls for assertions and
//! share state between clones.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{FetchError, FetchResult, InferenceError, InferenceResult};
use crate::traits::fetcher::{
    CheapFetcher, FetchRequest, FetchedPage, HeaderSet, RenderRequest, RenderedFetcher,
    UserAgentProvider,
};
use crate::traits::generator::{GenerationRequest, Generator};

/// A canned generator reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw model text
    Text(String),
    /// Capability-level failure, surfaced as `InferenceError::Unavailable`
    Fault(String),
}

/// A mock generator for testing.
///
/// Replies are resolved in order: scripted replies (consumed front to
/// back), then the first content rule whose needle occurs in the prompt,
/// then the default reply. With none of these configured, calls fail.
#[derive(Clone, Default)]
pub struct MockGenerator {
    scripted: Arc<RwLock<VecDeque<MockReply>>>,
    rules: Arc<RwLock<Vec<(String, MockReply)>>>,
    default_reply: Option<MockReply>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<GenerationRequest>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.scripted
            .write()
            .unwrap()
            .push_back(MockReply::Text(text.into()));
        self
    }

    /// Queue several replies.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        replies.into_iter().fold(self, |mock, text| mock.with_reply(text))
    }

    /// Reply with `text` whenever the prompt contains `needle`.
    pub fn with_reply_when(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules
            .write()
            .unwrap()
            .push((needle.into(), MockReply::Text(text.into())));
        self
    }

    /// Reply used when nothing else matches.
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(MockReply::Text(text.into()));
        self
    }

    /// Fail every unmatched call as a capability-level fault.
    pub fn with_fault(mut self, message: impl Into<String>) -> Self {
        self.default_reply = Some(MockReply::Fault(message.into()));
        self
    }

    /// Sleep before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// User prompts received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .map(|c| c.prompt.clone())
            .collect()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &GenerationRequest) -> Option<MockReply> {
        if let Some(reply) = self.scripted.write().unwrap().pop_front() {
            return Some(reply);
        }

        let matched = self
            .rules
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());

        matched.or_else(|| self.default_reply.clone())
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        self.calls.write().unwrap().push(request.clone());
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(request) {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fault(message)) => Err(InferenceError::Unavailable(message)),
            None => Err(InferenceError::Unavailable(
                "no mock reply configured".to_string(),
            )),
        }
    }

    async fn shutdown(&self) -> InferenceResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Canned outcome for one URL.
#[derive(Debug, Clone)]
enum MockPage {
    Page(FetchedPage),
    Fault(String),
}

impl MockPage {
    fn resolve(&self, url: &str) -> FetchResult<FetchedPage> {
        match self {
            MockPage::Page(page) if (200..300).contains(&page.status) => Ok(page.clone()),
            MockPage::Page(page) => Err(FetchError::Status {
                status: page.status,
                url: url.to_string(),
            }),
            MockPage::Fault(message) => Err(FetchError::Http(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                message.clone(),
            )))),
        }
    }
}

/// Shared page table, call log and concurrency tracking for the mock transports.
#[derive(Clone, Default)]
struct PageTable {
    pages: Arc<RwLock<HashMap<String, MockPage>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl PageTable {
    fn insert(&self, url: String, page: MockPage) {
        self.pages.write().unwrap().insert(url, page);
    }

    fn delay(&self, url: String, delay: Duration) {
        self.delays.write().unwrap().insert(url, delay);
    }

    async fn serve(&self, url: &str) -> FetchResult<FetchedPage> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let delay = self.delays.read().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let page = self.pages.read().unwrap().get(url).cloned();
        match page {
            Some(page) => page.resolve(url),
            None => Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// Mock cheap transport.
///
/// Unknown URLs answer `FetchError::Status { status: 404 }`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    table: PageTable,
    calls: Arc<RwLock<Vec<FetchRequest>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` with status 200 for `url`.
    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let page = FetchedPage::new(url.clone(), html);
        self.table.insert(url, MockPage::Page(page));
        self
    }

    /// Serve a non-success status for `url`.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        let page = FetchedPage::new(url.clone(), "").with_status(status);
        self.table.insert(url, MockPage::Page(page));
        self
    }

    /// Fail `url` with a transport error.
    pub fn with_fault(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.table.insert(url.into(), MockPage::Fault(message.into()));
        self
    }

    /// Delay the response for `url`.
    pub fn with_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        self.table.delay(url.into(), delay);
        self
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.table.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheapFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        self.calls.write().unwrap().push(request.clone());
        self.table.serve(&request.url).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock rendering-capable transport.
#[derive(Clone, Default)]
pub struct MockRenderer {
    table: PageTable,
    calls: Arc<RwLock<Vec<RenderRequest>>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve rendered `html` for `url`.
    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        let page = FetchedPage::new(url.clone(), html);
        self.table.insert(url, MockPage::Page(page));
        self
    }

    /// Fail `url` with a renderer error.
    pub fn with_fault(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.table.insert(url.into(), MockPage::Fault(message.into()));
        self
    }

    pub fn calls(&self) -> Vec<RenderRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl RenderedFetcher for MockRenderer {
    async fn render(&self, request: &RenderRequest) -> FetchResult<FetchedPage> {
        self.calls.write().unwrap().push(request.clone());
        self.table.serve(&request.url).await
    }

    fn name(&self) -> &str {
        "mock-renderer"
    }
}

/// Fixed header set.
#[derive(Debug, Clone)]
pub struct StaticAgents {
    headers: HeaderSet,
}

impl StaticAgents {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let mut headers = HeaderSet::new();
        headers.insert("User-Agent".to_string(), user_agent.into());
        Self { headers }
    }
}

impl Default for StaticAgents {
    fn default() -> Self {
        Self::new("weaver-test/1.0")
    }
}

impl UserAgentProvider for StaticAgents {
    fn headers(&self) -> HeaderSet {
        self.headers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_reply_order() {
        let mock = MockGenerator::new()
            .with_reply("first")
            .with_reply_when("needle", "matched")
            .with_default_reply("fallback");

        let plain = GenerationRequest::new("s", "plain");
        let needle = GenerationRequest::new("s", "has needle inside");

        assert_eq!(mock.generate(&needle).await.unwrap(), "first");
        assert_eq!(mock.generate(&needle).await.unwrap(), "matched");
        assert_eq!(mock.generate(&plain).await.unwrap(), "fallback");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.prompts()[2], "plain");
    }

    #[tokio::test]
    async fn test_mock_generator_without_reply_fails() {
        let mock = MockGenerator::new();
        let result = mock.generate(&GenerationRequest::new("s", "p")).await;
        assert!(matches!(result, Err(InferenceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_mock_fetcher_outcomes() {
        let fetcher = MockFetcher::new()
            .with_page("https://a.test", "<html>a</html>")
            .with_status("https://b.test", 503)
            .with_fault("https://c.test", "connection refused");

        let ok = fetcher.fetch(&FetchRequest::get("https://a.test")).await.unwrap();
        assert_eq!(ok.html, "<html>a</html>");

        let status = fetcher.fetch(&FetchRequest::get("https://b.test")).await;
        assert!(matches!(status, Err(FetchError::Status { status: 503, .. })));

        let fault = fetcher.fetch(&FetchRequest::get("https://c.test")).await;
        assert!(matches!(fault, Err(FetchError::Http(_))));

        let missing = fetcher.fetch(&FetchRequest::get("https://d.test")).await;
        assert!(matches!(missing, Err(FetchError::Status { status: 404, .. })));

        assert_eq!(fetcher.call_count(), 4);
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let renderer = MockRenderer::new().with_page("https://a.test", "<div>rendered</div>");
        let clone = renderer.clone();

        clone.render(&RenderRequest::new("https://a.test")).await.unwrap();
        assert_eq!(renderer.call_count(), 1);
    }
}
