//! Extraction results and the caller-facing response wrapper.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::attempt::ExtractionAttemptResult;
use crate::fetch::FetchState;
use crate::schema::SchemaDescriptor;

/// A schema-valid record and where it came from.
///
/// Only ever built from a valid attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeResult {
    pub schema: SchemaDescriptor,

    /// Every declared field, in schema order
    pub record: IndexMap<String, Value>,

    /// Character offset of the window the record was extracted from
    pub source_chunk_offset: usize,

    pub completeness: f32,

    /// Attempts made for this document
    pub attempts: usize,
}

impl ScrapeResult {
    /// Build from an attempt; `None` unless the attempt is valid.
    pub(crate) fn from_attempt(
        schema: &SchemaDescriptor,
        attempt: ExtractionAttemptResult,
        attempts: usize,
    ) -> Option<Self> {
        if !attempt.valid {
            return None;
        }

        Some(Self {
            schema: schema.clone(),
            record: attempt.record?,
            source_chunk_offset: attempt.chunk.offset,
            completeness: attempt.completeness,
            attempts,
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    /// Share of declared fields that are empty.
    pub fn empty_ratio(&self) -> f32 {
        self.schema.empty_ratio(&self.record)
    }
}

/// Immutable wrapper exposing a result in several serialization forms.
#[derive(Debug, Clone)]
pub struct ScrapeResponse {
    result: ScrapeResult,
    url: Option<String>,
    fetch_state: Option<FetchState>,
    html_path: Option<PathBuf>,
}

impl ScrapeResponse {
    pub fn new(result: ScrapeResult) -> Self {
        Self {
            result,
            url: None,
            fetch_state: None,
            html_path: None,
        }
    }

    pub(crate) fn with_source(mut self, url: impl Into<String>, state: FetchState) -> Self {
        self.url = Some(url.into());
        self.fetch_state = Some(state);
        self
    }

    pub(crate) fn with_html_path(mut self, path: Option<PathBuf>) -> Self {
        self.html_path = path;
        self
    }

    pub fn result(&self) -> &ScrapeResult {
        &self.result
    }

    pub fn into_result(self) -> ScrapeResult {
        self.result
    }

    pub fn record(&self) -> &IndexMap<String, Value> {
        &self.result.record
    }

    /// Source URL, when the HTML was fetched.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Fetch state of the HTML the record came from.
    pub fn fetch_state(&self) -> Option<FetchState> {
        self.fetch_state
    }

    /// Where the HTML was saved, if requested.
    pub fn html_path(&self) -> Option<&std::path::Path> {
        self.html_path.as_deref()
    }

    /// The record as a JSON object, in schema order.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.result
                .record
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// The record as JSON text; `Some(n)` pretty-prints with `n` spaces.
    pub fn to_json(&self, indent: Option<usize>) -> Result<String, serde_json::Error> {
        let Some(width) = indent else {
            return serde_json::to_string(&self.result.record);
        };

        let pad = " ".repeat(width);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.result.record.serialize(&mut serializer)?;
        String::from_utf8(buf).map_err(serde_json::Error::custom)
    }

    /// Deserialize the record into a caller type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

impl fmt::Display for ScrapeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = self.to_json(Some(2)).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkCandidate;
    use crate::schema::FieldType;
    use serde::Deserialize;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::builder()
            .required("title", FieldType::String, "Product title")
            .optional("price", FieldType::Float, "Price in USD")
            .build()
            .unwrap()
    }

    fn response(output: &str) -> ScrapeResponse {
        let attempt = ExtractionAttemptResult::from_output(
            ChunkCandidate::new(120, "..."),
            output.to_string(),
            &schema(),
        );
        ScrapeResponse::new(ScrapeResult::from_attempt(&schema(), attempt, 2).unwrap())
    }

    #[test]
    fn test_from_attempt_requires_valid() {
        let invalid = ExtractionAttemptResult::from_output(
            ChunkCandidate::new(0, "..."),
            "nothing".to_string(),
            &schema(),
        );
        assert!(ScrapeResult::from_attempt(&schema(), invalid, 1).is_none());
    }

    #[test]
    fn test_result_fields() {
        let response = response(r#"{"title": "Lamp", "price": "19.5"}"#);
        let result = response.result();

        assert_eq!(result.source_chunk_offset, 120);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.get("price"), Some(&serde_json::json!(19.5)));
        assert_eq!(result.empty_ratio(), 0.0);
    }

    #[test]
    fn test_serialization_forms() {
        let response = response(r#"{"price": 5, "title": "Lamp"}"#);

        // Schema order, not model output order
        assert_eq!(response.to_json(None).unwrap(), r#"{"title":"Lamp","price":5}"#);
        assert_eq!(
            response.to_json(Some(4)).unwrap(),
            "{\n    \"title\": \"Lamp\",\n    \"price\": 5\n}"
        );
        assert_eq!(
            response.to_string(),
            "{\n  \"title\": \"Lamp\",\n  \"price\": 5\n}"
        );
        assert_eq!(response.to_value()["title"], "Lamp");
    }

    #[test]
    fn test_typed_deserialize() {
        #[derive(Deserialize)]
        struct Product {
            title: String,
            price: Option<f64>,
        }

        let product: Product = response(r#"{"title": "Lamp"}"#).deserialize().unwrap();
        assert_eq!(product.title, "Lamp");
        assert_eq!(product.price, None);
    }
}
