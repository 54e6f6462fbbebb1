//! Typed errors for the weaver library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.
//!
//! Per-attempt faults (malformed output, schema violations, inference
//! timeouts) are *not* errors here: they are recorded on
//! [`ExtractionAttemptResult`] and absorbed by the orchestrator. Only
//! document-level and fetch-level faults surface as `Err`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attempt::ExtractionAttemptResult;

/// Classification of every failure the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transport/network failure. Not retried.
    FetchFault,
    /// Internal signal that the cheap page is JS-gated. Never surfaced.
    RenderRequired,
    /// Model output could not be parsed as a JSON object.
    MalformedOutput,
    /// Parsed output broke the schema (missing required field, wrong type).
    SchemaViolation,
    /// Every attempt was exhausted without a valid result.
    ExtractionFailed,
    /// A single generation call exceeded its timeout.
    InferenceTimeout,
    /// The generation capability itself failed or is unavailable.
    InferenceFault,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::FetchFault => "FETCH_FAULT",
            ErrorKind::RenderRequired => "RENDER_REQUIRED",
            ErrorKind::MalformedOutput => "MALFORMED_OUTPUT",
            ErrorKind::SchemaViolation => "SCHEMA_VIOLATION",
            ErrorKind::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorKind::InferenceTimeout => "INFERENCE_TIMEOUT",
            ErrorKind::InferenceFault => "INFERENCE_FAULT",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during the extraction pipeline.
#[derive(Debug, Error)]
pub enum WeaverError {
    /// Fetch failed (cheap or rendered path)
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Generation capability failed; aborts the remaining attempts for the document
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// No attempt produced a schema-valid record
    #[error("extraction failed after {attempts} attempt(s): best attempt {}", best.describe())]
    ExtractionFailed {
        attempts: usize,
        best: Box<ExtractionAttemptResult>,
    },

    /// Nothing to extract from
    #[error("document is empty")]
    EmptyDocument,

    /// Schema construction or parsing error
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Writing a side file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeaverError {
    /// The pipeline-level kind of this error, if it maps onto one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            WeaverError::Fetch(e) => Some(e.kind()),
            WeaverError::Inference(e) => Some(e.kind()),
            WeaverError::ExtractionFailed { .. } => Some(ErrorKind::ExtractionFailed),
            _ => None,
        }
    }

    /// The diagnostic attempt carried by an `ExtractionFailed` error.
    pub fn best_attempt(&self) -> Option<&ExtractionAttemptResult> {
        match self {
            WeaverError::ExtractionFailed { best, .. } => Some(best),
            _ => None,
        }
    }
}

/// Errors from the cheap or rendering-capable fetch paths.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-success HTTP status
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Fetch exceeded its timeout
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Rendering was required but no renderer is configured
    #[error("no rendering-capable fetcher configured")]
    RendererUnavailable,

    /// Renderer backend reported a failure
    #[error("renderer error: {0}")]
    Renderer(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FetchFault
    }
}

/// Errors from the text-generation capability.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The call did not return within its timeout
    #[error("generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The capability is shut down or otherwise unusable
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific failure (network, API error, bad response shape)
    #[error("generator backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Timeout(_) => ErrorKind::InferenceTimeout,
            _ => ErrorKind::InferenceFault,
        }
    }
}

/// Errors building a [`SchemaDescriptor`](crate::schema::SchemaDescriptor).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema declares no fields")]
    NoFields,

    #[error("field name must not be empty")]
    EmptyFieldName,

    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    #[error("unsupported JSON schema: {0}")]
    Unsupported(String),
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window size must be greater than zero")]
    ZeroWindow,

    #[error("overlap ({overlap}) must be smaller than window size ({window})")]
    OverlapTooLarge { overlap: usize, window: usize },

    #[error("relevance threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f32),

    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,

    #[error("requests per second must be greater than zero")]
    ZeroRate,

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

/// Result type alias for weaver operations.
pub type Result<T> = std::result::Result<T, WeaverError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for generation calls.
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;
