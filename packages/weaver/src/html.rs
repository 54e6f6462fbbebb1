//! Lightweight HTML clean-up applied before chunking.

use regex::Regex;
use std::sync::LazyLock;

static NOISE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|svg)\b[^>]*>.*?</(script|style|noscript|svg)\s*>")
        .expect("valid regex")
});

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid regex"));

/// Remove `<script>`, `<style>`, `<noscript>` and `<svg>` blocks and HTML
/// comments, then collapse runs of blank lines.
pub fn strip_noise(html: &str) -> String {
    let without_blocks = NOISE_BLOCKS.replace_all(html, "");
    let without_comments = COMMENTS.replace_all(&without_blocks, "");
    BLANK_LINES
        .replace_all(&without_comments, "\n")
        .trim()
        .to_string()
}
