//! End-to-end tests for the fetch/extract pipeline.
//!
//! Everything runs against the mocks in `weaver::testing`, so no network or
//! model is needed:
//! 1. Short documents get a single attempt
//! 2. Long documents are attempted on their most relevant window first
//! 3. Unusable model output surfaces as `ExtractionFailed`
//! 4. JS-gated pages are rendered before extraction
//! 5. Batches keep input order and serialize model calls

use std::time::Duration;

use weaver::{
    testing::{MockFetcher, MockGenerator, MockRenderer, StaticAgents},
    ErrorKind, FetchFallbackController, FetchConfig, FetchOptions, FetchState, FieldType,
    InferenceHandle, SchemaDescriptor, ScrapeOptions, Scraper, ScraperConfig, Weaver,
    WeaverConfig, WeaverError,
};

/// Helper to build a weaver over a mock generator.
fn weaver(generator: &MockGenerator) -> Weaver {
    Weaver::new(InferenceHandle::new(generator.clone()), WeaverConfig::default()).unwrap()
}

/// Helper to build a scraper over mock transports.
fn scraper(generator: &MockGenerator, fetcher: &MockFetcher, renderer: &MockRenderer) -> Scraper {
    Scraper::builder(InferenceHandle::new(generator.clone()))
        .config(ScraperConfig::new().with_concurrency(3))
        .fetcher(fetcher.clone())
        .renderer(renderer.clone())
        .agents(StaticAgents::default())
        .build()
        .unwrap()
}

fn title_schema() -> SchemaDescriptor {
    SchemaDescriptor::builder()
        .required("title", FieldType::String, "Page title")
        .build()
        .unwrap()
}

fn article(title: &str) -> String {
    format!(
        "<html><body><article><h1>{}</h1><p>{}</p></article></body></html>",
        title,
        "Plain paragraph text for the article body. ".repeat(20)
    )
}

#[tokio::test]
async fn test_short_document_extracts_in_one_attempt() {
    let generator = MockGenerator::new().with_default_reply(r#"<json>{"title": "Hello"}</json>"#);

    let result = weaver(&generator)
        .extract("<h1>Hello</h1>", &title_schema(), Some("get title"))
        .await
        .unwrap();

    assert_eq!(generator.call_count(), 1);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.record.len(), 1);
    assert_eq!(result.record["title"], "Hello");
    assert_eq!(result.completeness, 1.0);
    assert!(generator.prompts()[0].contains("get title"));
}

#[tokio::test]
async fn test_long_document_starts_with_most_relevant_window() {
    let schema = SchemaDescriptor::builder()
        .required("price", FieldType::Float, "Product price in dollars")
        .build()
        .unwrap();

    let filler: String = "lorem ipsum dolor sit amet. ".repeat(1500)[..38_000].to_string();
    let tail: String = "product price 19 dollars. ".repeat(100)[..2_000].to_string();
    let document = format!("{}{}", filler, tail);
    assert_eq!(document.chars().count(), 40_000);

    let generator = MockGenerator::new().with_default_reply(r#"<json>{"price": 19}</json>"#);
    let weaver = weaver(&generator);

    let candidates = weaver.candidates(&document, &schema);
    assert_eq!(candidates[0].offset, 28_000);
    assert!(candidates[0].text.ends_with(&tail));

    let result = weaver.extract(&document, &schema, None).await.unwrap();

    assert_eq!(result.source_chunk_offset, 28_000);
    assert_eq!(result.record["price"], 19.0);
    assert!(generator.prompts()[0].contains("product price 19 dollars"));
}

#[tokio::test]
async fn test_malformed_output_fails_extraction() {
    let generator = MockGenerator::new().with_default_reply("Sorry, I cannot find a title here.");

    let err = weaver(&generator)
        .extract("<h1>Hello</h1>", &title_schema(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ExtractionFailed));
    let best = err.best_attempt().unwrap();
    assert!(!best.valid);
    assert_eq!(best.error, Some(ErrorKind::MalformedOutput));
    assert_eq!(best.raw_output, "Sorry, I cannot find a title here.");
}

#[tokio::test]
async fn test_every_window_malformed_reports_attempt_count() {
    let generator = MockGenerator::new().with_default_reply("not json");
    let config = WeaverConfig::default().with_window(100, 10);
    let weaver = Weaver::new(InferenceHandle::new(generator.clone()), config).unwrap();

    let document = "Page title: something. ".repeat(20);
    let candidates = weaver.candidates(&document, &title_schema()).len();
    let err = weaver.extract(&document, &title_schema(), None).await.unwrap_err();

    match err {
        WeaverError::ExtractionFailed { attempts, best } => {
            assert_eq!(attempts, candidates);
            assert!(!best.valid);
        }
        other => panic!("expected ExtractionFailed, got {other:?}"),
    }
    assert_eq!(generator.call_count(), candidates);
}

#[tokio::test]
async fn test_placeholder_page_is_rendered_before_extraction() {
    let url = "https://spa.test/post";
    let fetcher =
        MockFetcher::new().with_page(url, "<html><body><div id=\"root\"></div></body></html>");
    let renderer = MockRenderer::new().with_page(url, article("Rendered Title"));
    let generator =
        MockGenerator::new().with_reply_when("Rendered Title", r#"<json>{"title": "Rendered Title"}</json>"#);

    let response = scraper(&generator, &fetcher, &renderer)
        .scrape(url, &title_schema(), &ScrapeOptions::default())
        .await
        .unwrap();

    assert_eq!(response.fetch_state(), Some(FetchState::RenderedOk));
    assert_eq!(response.record()["title"], "Rendered Title");
    assert_eq!(generator.call_count(), 1);
    assert!(!generator.prompts()[0].contains("id=\"root\""));
}

#[tokio::test]
async fn test_insufficient_page_never_fails_on_insufficiency_alone() {
    let url = "https://spa.test/post";
    let fetcher = MockFetcher::new().with_page(url, "<html><body>Loading...</body></html>");
    let renderer = MockRenderer::new().with_page(url, article("Rendered Title"));
    let controller = FetchFallbackController::new(fetcher, FetchConfig::default())
        .unwrap()
        .with_renderer(renderer.clone());

    let outcome = controller.fetch(url, FetchOptions::default()).await.unwrap();

    let path: Vec<FetchState> = outcome.transitions.iter().map(|t| t.to).collect();
    assert_eq!(path, vec![FetchState::FastInsufficient, FetchState::RenderedOk]);
    assert_eq!(renderer.calls()[0].url, url);
}

#[tokio::test]
async fn test_scrape_many_keeps_input_order() {
    let urls = ["https://a.test", "https://b.test", "https://c.test", "https://d.test"];
    let fetcher = MockFetcher::new()
        .with_page(urls[0], article("Alpha"))
        .with_delay(urls[0], Duration::from_millis(60))
        .with_page(urls[1], article("Bravo"))
        .with_page(urls[2], article("Charlie"))
        .with_delay(urls[2], Duration::from_millis(30))
        .with_status(urls[3], 404);
    let generator = MockGenerator::new()
        .with_reply_when("Alpha", r#"<json>{"title": "Alpha"}</json>"#)
        .with_reply_when("Bravo", r#"<json>{"title": "Bravo"}</json>"#)
        .with_reply_when("Charlie", r#"<json>{"title": "Charlie"}</json>"#)
        .with_delay(Duration::from_millis(10));

    let results = scraper(&generator, &fetcher, &MockRenderer::new())
        .scrape_many(&urls, &title_schema(), &ScrapeOptions::default())
        .await;

    let order: Vec<&str> = results.iter().map(|(url, _)| url.as_str()).collect();
    assert_eq!(order, urls);

    let titles: Vec<Option<String>> = results
        .iter()
        .map(|(_, r)| {
            r.as_ref()
                .ok()
                .and_then(|resp| resp.record()["title"].as_str().map(String::from))
        })
        .collect();
    assert_eq!(
        titles,
        vec![
            Some("Alpha".to_string()),
            Some("Bravo".to_string()),
            Some("Charlie".to_string()),
            None
        ]
    );
    assert!(matches!(results[3].1, Err(WeaverError::Fetch(_))));

    // Fetches overlap, model calls never do
    assert!(fetcher.max_concurrent_calls() > 1);
    assert_eq!(generator.max_concurrent_calls(), 1);
}

#[tokio::test]
async fn test_extract_batch_isolates_failures() {
    let generator = MockGenerator::new()
        .with_reply_when("Alpha", r#"<json>{"title": "Alpha"}</json>"#)
        .with_default_reply("no idea");
    let scraper = scraper(&generator, &MockFetcher::new(), &MockRenderer::new());

    let documents = [article("Alpha"), String::new(), article("Bravo")];
    let results = scraper
        .extract_batch(&documents, &title_schema(), None)
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().record()["title"], "Alpha");
    assert!(matches!(results[1], Err(WeaverError::EmptyDocument)));
    assert!(matches!(results[2], Err(WeaverError::ExtractionFailed { .. })));
}

#[tokio::test]
async fn test_typed_response_access() {
    #[derive(serde::Deserialize)]
    struct Page {
        title: String,
    }

    let generator = MockGenerator::new().with_default_reply(r#"<json>{"title": "Typed"}</json>"#);
    let scraper = scraper(&generator, &MockFetcher::new(), &MockRenderer::new());

    let response = scraper
        .extract_from_html("<h1>Typed</h1>", &title_schema(), None)
        .await
        .unwrap();

    let page: Page = response.deserialize().unwrap();
    assert_eq!(page.title, "Typed");
    assert_eq!(response.to_string(), "{\n  \"title\": \"Typed\"\n}");
}
