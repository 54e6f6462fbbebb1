//! A single extraction attempt: one chunk, one schema, one model call.
//!
//! The attempt is the trust boundary for model output. Whatever text comes
//! back is parsed, type-checked against the schema and scored for
//! completeness. Malformed output, schema violations and timeouts are
//! recorded on the [`ExtractionAttemptResult`]; only capability-level
//! faults (backend down, handle shut down) escape as `Err`.

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::chunk::ChunkCandidate;
use crate::error::{ErrorKind, InferenceError, InferenceResult};
use crate::inference::InferenceHandle;
use crate::prompts::{format_extract_prompt, EXTRACT_SYSTEM_PROMPT};
use crate::schema::SchemaDescriptor;
use crate::traits::generator::GenerationRequest;

static JSON_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<json>(.*?)</json>").expect("valid regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex"));

/// Sampling parameters for one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for AttemptParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionAttemptResult {
    pub chunk: ChunkCandidate,

    /// Raw model text (empty when the call timed out)
    pub raw_output: String,

    /// Parsed JSON object, if the output parsed
    pub parsed: Option<Value>,

    /// Coerced record with every declared field, present only when valid
    pub record: Option<IndexMap<String, Value>>,

    pub valid: bool,

    /// Fraction of declared fields present and non-empty
    pub completeness: f32,

    pub error: Option<ErrorKind>,

    /// Why validation rejected the output
    pub violations: Vec<String>,
}

impl ExtractionAttemptResult {
    /// Attempt whose output could not be parsed.
    pub fn malformed(chunk: ChunkCandidate, raw_output: String) -> Self {
        Self {
            chunk,
            raw_output,
            parsed: None,
            record: None,
            valid: false,
            completeness: 0.0,
            error: Some(ErrorKind::MalformedOutput),
            violations: Vec::new(),
        }
    }

    /// Attempt whose model call timed out.
    pub fn timed_out(chunk: ChunkCandidate) -> Self {
        Self {
            error: Some(ErrorKind::InferenceTimeout),
            ..Self::malformed(chunk, String::new())
        }
    }

    /// Parse and validate raw model output against a schema.
    pub fn from_output(chunk: ChunkCandidate, raw_output: String, schema: &SchemaDescriptor) -> Self {
        let Some(object) = parse_json_object(&raw_output) else {
            return Self::malformed(chunk, raw_output);
        };

        let parsed = Value::Object(object);
        let validation = schema.validate(&parsed);
        let valid = validation.is_valid();

        Self {
            chunk,
            raw_output,
            parsed: Some(parsed),
            record: validation.record,
            valid,
            completeness: validation.completeness,
            error: (!valid).then_some(ErrorKind::SchemaViolation),
            violations: validation.violations,
        }
    }

    /// Short diagnostic description.
    pub fn describe(&self) -> String {
        match self.error {
            Some(kind) => format!(
                "at offset {} failed with {} (completeness {:.2})",
                self.chunk.offset, kind, self.completeness
            ),
            None => format!(
                "at offset {} succeeded (completeness {:.2})",
                self.chunk.offset, self.completeness
            ),
        }
    }
}

/// Runs attempts for one (schema, instructions, params) combination.
pub struct ExtractionAttempt<'a> {
    handle: &'a InferenceHandle,
    schema: &'a SchemaDescriptor,
    instructions: Option<&'a str>,
    params: AttemptParams,
}

impl<'a> ExtractionAttempt<'a> {
    pub fn new(
        handle: &'a InferenceHandle,
        schema: &'a SchemaDescriptor,
        instructions: Option<&'a str>,
        params: AttemptParams,
    ) -> Self {
        Self {
            handle,
            schema,
            instructions,
            params,
        }
    }

    /// Build the generation request for one chunk.
    pub fn request(&self, chunk: &ChunkCandidate) -> GenerationRequest {
        GenerationRequest::new(
            EXTRACT_SYSTEM_PROMPT,
            format_extract_prompt(self.schema, self.instructions, &chunk.text),
        )
        .with_temperature(self.params.temperature)
        .with_max_tokens(self.params.max_tokens)
        .with_timeout(self.params.timeout)
    }

    /// Run one attempt.
    ///
    /// Returns `Err` only for capability-level faults; every other outcome
    /// is an `ExtractionAttemptResult`.
    pub async fn run(&self, chunk: ChunkCandidate) -> InferenceResult<ExtractionAttemptResult> {
        let request = self.request(&chunk);

        let result = match self.handle.generate(&request).await {
            Ok(text) => ExtractionAttemptResult::from_output(chunk, text, self.schema),
            Err(InferenceError::Timeout(_)) => ExtractionAttemptResult::timed_out(chunk),
            Err(e) => return Err(e),
        };

        debug!(
            offset = result.chunk.offset,
            length = result.chunk.length,
            valid = result.valid,
            completeness = result.completeness,
            error = ?result.error,
            "Extraction attempt finished"
        );

        Ok(result)
    }
}

/// Recover a JSON object from model text.
///
/// Tries, in order: the contents of `<json>` tags, the contents of a
/// markdown code fence, then the outermost `{...}` span of the text. Each
/// candidate is parsed whole first and then by its outermost braces.
pub fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(inner) = JSON_TAG.captures(text).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str());
    }
    if let Some(inner) = CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str());
    }
    candidates.push(text);

    candidates.into_iter().find_map(|candidate| {
        let candidate = candidate.trim();
        parse_object(candidate).or_else(|| outermost_braces(candidate).and_then(parse_object))
    })
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
