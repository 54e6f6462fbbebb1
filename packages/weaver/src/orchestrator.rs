//! Extraction orchestrator ("Weaver").
//!
//! Composes chunk planning, relevance scoring and extraction attempts into
//! one deterministic answer per document:
//!
//! 1. A document that fits in one window gets exactly one attempt.
//! 2. Otherwise windows are scored and ordered by score (descending), then
//!    offset (ascending).
//! 3. Every window scoring above the threshold is selected; if none does,
//!    the single best window is.
//! 4. Attempts run in that order, keeping the most complete valid result
//!    and stopping early on a perfect one.
//! 5. With no valid attempt the document fails with `ExtractionFailed`,
//!    carrying the most complete invalid attempt.

use std::borrow::Cow;
use tracing::{debug, info, instrument, warn};

use crate::attempt::{ExtractionAttempt, ExtractionAttemptResult};
use crate::chunk::{ChunkCandidate, ChunkPlanner};
use crate::config::WeaverConfig;
use crate::error::{Result, WeaverError};
use crate::html::strip_noise;
use crate::inference::InferenceHandle;
use crate::prompts::{format_analyze_prompt, ANALYZE_SYSTEM_PROMPT};
use crate::relevance::RelevanceScorer;
use crate::response::ScrapeResult;
use crate::schema::SchemaDescriptor;
use crate::traits::generator::GenerationRequest;

/// The extraction orchestrator.
#[derive(Debug, Clone)]
pub struct Weaver {
    handle: InferenceHandle,
    config: WeaverConfig,
    planner: ChunkPlanner,
}

impl Weaver {
    /// Create an orchestrator over an inference handle.
    pub fn new(handle: InferenceHandle, config: WeaverConfig) -> Result<Self> {
        config.validate()?;
        let planner = config.planner()?;
        Ok(Self {
            handle,
            config,
            planner,
        })
    }

    pub fn handle(&self) -> &InferenceHandle {
        &self.handle
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Windows to attempt for `document`, in attempt order.
    ///
    /// A document that fits in one window yields that window, unscored.
    pub fn candidates(&self, document: &str, schema: &SchemaDescriptor) -> Vec<ChunkCandidate> {
        let total_chars = document.chars().count();
        if total_chars == 0 {
            return Vec::new();
        }
        if !self.planner.needs_chunking(total_chars) {
            return vec![ChunkCandidate::new(0, document)];
        }

        let scorer = RelevanceScorer::new(schema);
        let mut scored: Vec<ChunkCandidate> = self
            .planner
            .plan(document)
            .map(|chunk| scorer.score_chunk(chunk))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.offset.cmp(&b.offset))
        });

        let threshold = self.config.relevance_threshold;
        let above = scored.iter().take_while(|c| c.score > threshold).count();
        if above == 0 {
            debug!(
                windows = scored.len(),
                threshold, "No window cleared the relevance threshold, using the best one"
            );
        }
        scored.truncate(above.max(1));

        if let Some(max) = self.config.max_attempts {
            scored.truncate(max.max(1));
        }

        scored
    }

    /// Extract one record from `document`.
    #[instrument(skip(self, document, schema, instructions), fields(chars = tracing::field::Empty, fields = schema.len()))]
    pub async fn extract(
        &self,
        document: &str,
        schema: &SchemaDescriptor,
        instructions: Option<&str>,
    ) -> Result<ScrapeResult> {
        let document: Cow<'_, str> = if self.config.strip_noise {
            Cow::Owned(strip_noise(document))
        } else {
            Cow::Borrowed(document)
        };

        if document.trim().is_empty() {
            return Err(WeaverError::EmptyDocument);
        }
        tracing::Span::current().record("chars", document.chars().count());

        let candidates = self.candidates(&document, schema);
        info!(candidates = candidates.len(), "Starting extraction");

        let attempt = ExtractionAttempt::new(
            &self.handle,
            schema,
            instructions,
            self.config.attempt_params(),
        );

        let mut attempts = 0;
        let mut best_valid: Option<ExtractionAttemptResult> = None;
        let mut best_invalid: Option<ExtractionAttemptResult> = None;

        for chunk in candidates {
            let score = chunk.score;
            let result = attempt.run(chunk).await?;
            attempts += 1;

            if !result.valid {
                warn!(
                    offset = result.chunk.offset,
                    score,
                    error = ?result.error,
                    violations = ?result.violations,
                    "Attempt rejected"
                );
                if is_better(&result, best_invalid.as_ref()) {
                    best_invalid = Some(result);
                }
                continue;
            }

            let perfect = result.completeness >= 1.0;
            if is_better(&result, best_valid.as_ref()) {
                best_valid = Some(result);
            }
            if perfect {
                debug!(attempts, "Complete record found, stopping early");
                break;
            }
        }

        if let Some(result) =
            best_valid.and_then(|best| ScrapeResult::from_attempt(schema, best, attempts))
        {
            info!(
                attempts,
                offset = result.source_chunk_offset,
                completeness = result.completeness,
                "Extraction succeeded"
            );
            return Ok(result);
        }

        let best = best_invalid.ok_or(WeaverError::EmptyDocument)?;
        warn!(attempts, best = %best.describe(), "Extraction failed");
        Err(WeaverError::ExtractionFailed {
            attempts,
            best: Box::new(best),
        })
    }

    /// Extract from several documents independently.
    ///
    /// One document's failure does not affect the others; results are in
    /// input order.
    pub async fn extract_batch<S: AsRef<str>>(
        &self,
        documents: &[S],
        schema: &SchemaDescriptor,
        instructions: Option<&str>,
    ) -> Vec<Result<ScrapeResult>> {
        let mut results = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let result = self.extract(document.as_ref(), schema, instructions).await;
            if let Err(e) = &result {
                warn!(index, error = %e, "Batch item failed");
            }
            results.push(result);
        }
        results
    }

    /// Free-form analysis of the first window of `html`.
    ///
    /// Returns the raw model text.
    #[instrument(skip(self, html, prompt))]
    pub async fn analyze(&self, html: &str, prompt: &str, temperature: Option<f32>) -> Result<String> {
        let content: String = html.chars().take(self.config.window_size).collect();
        let request = GenerationRequest::new(ANALYZE_SYSTEM_PROMPT, format_analyze_prompt(prompt, &content))
            .with_temperature(temperature.unwrap_or(self.config.temperature))
            .with_max_tokens(self.config.max_tokens)
            .with_timeout(self.config.inference_timeout);

        Ok(self.handle.generate(&request).await?)
    }
}

/// Strictly higher completeness wins; ties keep the earlier attempt.
fn is_better(candidate: &ExtractionAttemptResult, current: Option<&ExtractionAttemptResult>) -> bool {
    current.map_or(true, |best| candidate.completeness > best.completeness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, InferenceError};
    use crate::schema::FieldType;
    use crate::testing::MockGenerator;
    use std::sync::Arc;

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::builder()
            .required("title", FieldType::String, "Product title")
            .optional("price", FieldType::Float, "Product price")
            .build()
            .unwrap()
    }

    fn weaver(generator: &Arc<MockGenerator>, config: WeaverConfig) -> Weaver {
        Weaver::new(InferenceHandle::from_arc(generator.clone()), config).unwrap()
    }

    /// Filler with no schema keywords.
    fn filler(chars: usize) -> String {
        "lorem ipsum dolor sit amet ".chars().cycle().take(chars).collect()
    }

    #[tokio::test]
    async fn test_short_document_single_attempt() {
        let generator = Arc::new(MockGenerator::new().with_default_reply(r#"<json>{"title": "Lamp"}</json>"#));
        let weaver = weaver(&generator, WeaverConfig::default());

        let result = weaver.extract("<h1>Lamp</h1>", &schema(), None).await.unwrap();

        assert_eq!(generator.call_count(), 1);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.record["title"], "Lamp");
        assert_eq!(result.source_chunk_offset, 0);
    }

    #[tokio::test]
    async fn test_empty_document_makes_no_call() {
        let generator = Arc::new(MockGenerator::new().with_default_reply("{}"));
        let weaver = weaver(&generator, WeaverConfig::default());

        let result = weaver.extract("  \n ", &schema(), None).await;

        assert!(matches!(result, Err(WeaverError::EmptyDocument)));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_candidates_order_by_score_then_offset() {
        let generator = Arc::new(MockGenerator::new());
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(0.0),
        );

        // Windows at 0, 100, 200, 300; the two middle windows are equally relevant
        let mut document = filler(100);
        document.push_str(&format!("product title price {}", filler(80)));
        document.push_str(&format!("product title price {}", filler(80)));
        document.push_str(&filler(100));

        let offsets: Vec<_> = weaver
            .candidates(&document, &schema())
            .iter()
            .map(|c| c.offset)
            .collect();

        assert_eq!(offsets, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_falls_back_to_best_window_below_threshold() {
        let generator = Arc::new(MockGenerator::new());
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(1.0),
        );

        let document = format!("{}price{}", filler(250), filler(145));
        let candidates = weaver.candidates(&document, &schema());

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].offset, 200);
    }

    #[tokio::test]
    async fn test_keeps_most_complete_valid_attempt() {
        let generator = Arc::new(MockGenerator::new().with_replies([
            r#"<json>{"title": "Lamp"}</json>"#,
            r#"<json>{"title": "Lamp", "price": null}</json>"#,
            r#"<json>{"title": "Lamp", "price": 19.5}</json>"#,
        ]));
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(0.0),
        );
        let document = "product title price ".repeat(15);

        let result = weaver.extract(&document, &schema(), None).await.unwrap();

        assert_eq!(generator.call_count(), 3);
        assert_eq!(result.completeness, 1.0);
        assert_eq!(result.record["price"], 19.5);
        assert_eq!(result.source_chunk_offset, 200);
    }

    #[tokio::test]
    async fn test_stops_early_on_complete_record() {
        let generator = Arc::new(
            MockGenerator::new()
                .with_reply(r#"<json>{"title": "Lamp", "price": 3}</json>"#)
                .with_default_reply(r#"<json>{"title": "Other"}</json>"#),
        );
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(0.0),
        );
        let document = "product title price ".repeat(15);

        let result = weaver.extract(&document, &schema(), None).await.unwrap();

        assert_eq!(generator.call_count(), 1);
        assert_eq!(result.record["title"], "Lamp");
        assert_eq!(result.completeness, 1.0);
    }

    #[tokio::test]
    async fn test_ties_keep_earliest_attempt() {
        let generator = Arc::new(MockGenerator::new().with_replies([
            r#"<json>{"title": "First"}</json>"#,
            r#"<json>{"title": "Second"}</json>"#,
        ]));
        let weaver = weaver(
            &generator,
            WeaverConfig::default()
                .with_window(100, 0)
                .with_relevance_threshold(0.0)
                .with_max_attempts(2),
        );
        let document = "product title price ".repeat(15);

        let result = weaver.extract(&document, &schema(), None).await.unwrap();

        assert_eq!(result.record["title"], "First");
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let generator = Arc::new(
            MockGenerator::new()
                .with_reply("<json>{\"title\": \"never\"}</json>")
                .with_delay(std::time::Duration::from_millis(50)),
        );
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_inference_timeout(std::time::Duration::from_millis(5)),
        );

        let err = weaver.extract("<h1>Lamp</h1>", &schema(), None).await.unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::ExtractionFailed));
        assert_eq!(
            err.best_attempt().and_then(|a| a.error),
            Some(ErrorKind::InferenceTimeout)
        );
    }

    #[tokio::test]
    async fn test_inference_fault_aborts_document() {
        let generator = Arc::new(MockGenerator::new().with_fault("out of memory"));
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(0.0),
        );
        let document = "product title price ".repeat(15);

        let err = weaver.extract(&document, &schema(), None).await.unwrap_err();

        assert!(matches!(err, WeaverError::Inference(InferenceError::Unavailable(_))));
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_diagnostic_is_most_complete_invalid_attempt() {
        let generator = Arc::new(MockGenerator::new().with_replies([
            "not json",
            r#"<json>{"price": 4}</json>"#,
            "still not json",
        ]));
        let weaver = weaver(
            &generator,
            WeaverConfig::default().with_window(100, 0).with_relevance_threshold(0.0),
        );
        let document = "product title price ".repeat(15);

        let err = weaver.extract(&document, &schema(), None).await.unwrap_err();

        let WeaverError::ExtractionFailed { attempts, best } = err else {
            panic!("expected ExtractionFailed");
        };
        assert_eq!(attempts, 3);
        assert_eq!(best.error, Some(ErrorKind::SchemaViolation));
        assert_eq!(best.completeness, 0.5);
        assert!(!best.valid);
    }

    #[tokio::test]
    async fn test_strip_noise_before_chunking() {
        let generator = Arc::new(MockGenerator::new().with_default_reply(r#"{"title": "Lamp"}"#));
        let weaver = weaver(&generator, WeaverConfig::default().with_strip_noise(true));

        weaver
            .extract("<script>var tracking = 1;</script><h1>Lamp</h1>", &schema(), None)
            .await
            .unwrap();

        assert!(!generator.prompts()[0].contains("tracking"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let generator = Arc::new(
            MockGenerator::new()
                .with_reply_when("<h1>A</h1>", r#"{"title": "A"}"#)
                .with_reply_when("<h1>B</h1>", "garbage")
                .with_reply_when("<h1>C</h1>", r#"{"title": "C"}"#),
        );
        let weaver = weaver(&generator, WeaverConfig::default());

        let results = weaver
            .extract_batch(&["<h1>A</h1>", "<h1>B</h1>", "<h1>C</h1>"], &schema(), None)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().record["title"], "A");
        assert!(matches!(results[1], Err(WeaverError::ExtractionFailed { .. })));
        assert_eq!(results[2].as_ref().unwrap().record["title"], "C");
    }

    #[tokio::test]
    async fn test_analyze_truncates_to_window() {
        let generator = Arc::new(MockGenerator::new().with_default_reply("A lamp store."));
        let weaver = weaver(&generator, WeaverConfig::default().with_window(50, 10));

        let text = weaver
            .analyze(&"x".repeat(500), "Describe the page", Some(0.7))
            .await
            .unwrap();

        assert_eq!(text, "A lamp store.");
        let call = &generator.calls()[0];
        assert_eq!(call.temperature, 0.7);
        assert!(call.prompt.contains(&"x".repeat(50)));
        assert!(!call.prompt.contains(&"x".repeat(51)));
    }
}
