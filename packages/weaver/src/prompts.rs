//! LLM prompts for schema extraction and free-form analysis.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::schema::SchemaDescriptor;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

/// System prompt for every extraction attempt.
pub const EXTRACT_SYSTEM_PROMPT: &str = "You are an expert web data extraction engine. \
Your task is to extract structured data from HTML content with precision and accuracy. \
Follow the schema exactly. Return ONLY one valid JSON object wrapped in <json></json> tags. \
If a field is not found, use null for optional fields or your best inference for required fields.";

/// User prompt for one extraction attempt on one chunk.
pub const EXTRACT_PROMPT: &str = r#"Extract structured data from the HTML below according to this schema.

SCHEMA:
{schema}

FIELDS:
{fields}
{instructions_section}
HTML CONTENT:
{content}

Extract the data and return it as a single valid JSON object wrapped in <json></json> tags."#;

/// System prompt for free-form analysis.
pub const ANALYZE_SYSTEM_PROMPT: &str = "You are an expert web scraping and analysis assistant.";

/// User prompt for free-form analysis.
pub const ANALYZE_PROMPT: &str = r#"{prompt}

HTML CONTENT:
{content}"#;

/// Format the extraction prompt for one chunk.
pub fn format_extract_prompt(
    schema: &SchemaDescriptor,
    instructions: Option<&str>,
    content: &str,
) -> String {
    let schema_text = serde_json::to_string_pretty(&schema.to_json_schema()).unwrap_or_default();

    let fields_text = schema
        .fields()
        .iter()
        .map(|f| {
            format!(
                "- {} ({}, {}): {}",
                f.name,
                f.field_type,
                if f.required { "required" } else { "optional" },
                f.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let instructions_section = match instructions.map(str::trim) {
        Some(text) if !text.is_empty() => format!("\nINSTRUCTIONS: {}\n", text),
        _ => String::new(),
    };

    fill(
        EXTRACT_PROMPT,
        &[
            ("schema", schema_text.as_str()),
            ("fields", fields_text.as_str()),
            ("instructions_section", instructions_section.as_str()),
            ("content", content),
        ],
    )
}

/// Format a free-form analysis prompt.
pub fn format_analyze_prompt(prompt: &str, content: &str) -> String {
    fill(ANALYZE_PROMPT, &[("prompt", prompt), ("content", content)])
}

/// Substitute `{key}` placeholders of the template in one pass; inserted
/// values are never scanned for placeholders themselves.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}
