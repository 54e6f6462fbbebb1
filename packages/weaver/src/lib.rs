//! Schema-Driven HTML Extraction Library
//!
//! Turns web pages into typed records with a local language model, even when
//! the page is far larger than the model's useful context and even when the
//! page only renders its content with JavaScript.
//!
//! # Pipeline
//!
//! 1. **Fetch** a page cheaply; if it looks like a JS-gated placeholder,
//!    escalate to a rendering-capable transport.
//! 2. **Chunk** the HTML into overlapping windows and **score** each one for
//!    schema keywords.
//! 3. **Attempt** extraction on the best windows, in order, through a single
//!    serialized inference handle.
//! 4. **Validate** every model answer against the schema and keep the most
//!    complete valid one.
//!
//! # Usage
//!
//! ```rust,ignore
//! use weaver::{FieldType, InferenceHandle, SchemaDescriptor, Weaver, WeaverConfig};
//! use weaver::testing::MockGenerator;
//!
//! let handle = InferenceHandle::new(MockGenerator::new().with_default_reply(r#"<json>{"title": "Hello"}</json>"#));
//! let weaver = Weaver::new(handle, WeaverConfig::default())?;
//!
//! let schema = SchemaDescriptor::builder()
//!     .required("title", FieldType::String, "Page title")
//!     .build()?;
//!
//! let result = weaver.extract("<h1>Hello</h1>", &schema, Some("get title")).await?;
//! assert_eq!(result.record["title"], "Hello");
//! ```
//!
//! # Modules
//!
//! - [`schema`] - Field descriptors, validation and coercion
//! - [`chunk`] / [`relevance`] - Window planning and keyword scoring
//! - [`attempt`] / [`orchestrator`] - Per-window attempts and their composition
//! - [`inference`] - Lock-serialized handle to the text generator
//! - [`fetch`] - Transports, sufficiency heuristic and fallback controller
//! - [`scraper`] - Fetch-then-extract facade
//! - [`testing`] - Mock implementations for testing

pub mod attempt;
pub mod chunk;
pub mod config;
pub mod error;
pub mod fetch;
pub mod generators;
pub mod html;
pub mod inference;
pub mod orchestrator;
pub mod prompts;
pub mod relevance;
pub mod response;
pub mod schema;
pub mod scraper;
pub mod testing;
pub mod traits;

// Re-export core types at crate root
pub use attempt::{AttemptParams, ExtractionAttempt, ExtractionAttemptResult};
pub use chunk::{ChunkCandidate, ChunkPlanner};
pub use config::{
    ApiKey, FetchConfig, ScraperConfig, SufficiencyConfig, WeaverConfig, DEFAULT_BASE_URL,
    DEFAULT_MODEL,
};
pub use error::{
    ConfigError, ErrorKind, FetchError, InferenceError, Result, SchemaError, WeaverError,
};
pub use fetch::{
    FetchFallbackController, FetchOptions, FetchOutcome, FetchState, HttpFetcher,
    RateLimitedFetcher, RotatingAgents, SufficiencyCheck,
};
pub use inference::InferenceHandle;
pub use orchestrator::Weaver;
pub use relevance::RelevanceScorer;
pub use response::{ScrapeResponse, ScrapeResult};
pub use schema::{FieldSpec, FieldType, SchemaDescriptor};
pub use scraper::{ScrapeOptions, Scraper, ScraperBuilder};
pub use traits::{
    fetcher::{CheapFetcher, FetchRequest, FetchedPage, RenderRequest, RenderedFetcher, UserAgentProvider},
    generator::{GenerationRequest, Generator},
};

#[cfg(feature = "firecrawl")]
pub use fetch::FirecrawlRenderer;

#[cfg(feature = "openai")]
pub use generators::OpenAiGenerator;
