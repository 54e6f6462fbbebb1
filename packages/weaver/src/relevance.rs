//! Keyword-density relevance scoring of chunk windows.
//!
//! Keywords come from the schema: every field description and every field
//! name (split on `_`), lower-cased, stripped of punctuation, with stop
//! words and tokens shorter than 3 characters discarded. A window's score
//! is its keyword hit density per thousand characters, divided by a
//! saturation constant and clamped to 1.0.

use std::collections::BTreeSet;

use crate::chunk::ChunkCandidate;
use crate::schema::SchemaDescriptor;

/// Hits per 1 000 characters at which a window scores 1.0.
pub const DEFAULT_SATURATION: f32 = 2.0;

const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "also", "and", "any", "are", "because", "been",
    "before", "being", "below", "between", "both", "but", "can", "could", "did", "does", "doing",
    "down", "during", "each", "etc", "few", "for", "from", "further", "get", "had", "has", "have",
    "having", "her", "here", "hers", "him", "his", "how", "into", "its", "itself", "just", "may",
    "more", "most", "must", "not", "now", "off", "once", "only", "other", "our", "ours", "out",
    "over", "own", "same", "she", "should", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "too",
    "under", "until", "very", "was", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
];

/// Scores windows by schema keyword density.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    keywords: Vec<String>,
    saturation: f32,
}

impl RelevanceScorer {
    /// Derive the keyword set from a schema.
    pub fn new(schema: &SchemaDescriptor) -> Self {
        let mut keywords = BTreeSet::new();
        for field in schema.fields() {
            keywords.extend(tokenize(&field.description));
            keywords.extend(tokenize(&field.name.replace('_', " ")));
        }

        Self {
            keywords: keywords.into_iter().collect(),
            saturation: DEFAULT_SATURATION,
        }
    }

    /// Override the saturation constant (hits per 1 000 characters).
    pub fn with_saturation(mut self, saturation: f32) -> Self {
        self.saturation = saturation.max(f32::EPSILON);
        self
    }

    /// Deduplicated keywords in lexical order.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Total keyword occurrences in `text`, overlapping matches included.
    pub fn hits(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .map(|keyword| count_overlapping(&lower, keyword))
            .sum()
    }

    /// Relevance of `text` in [0, 1].
    pub fn score(&self, text: &str) -> f32 {
        let length = text.chars().count();
        if length == 0 || self.keywords.is_empty() {
            return 0.0;
        }

        let per_thousand = self.hits(text) as f32 * 1000.0 / length as f32;
        (per_thousand / self.saturation).clamp(0.0, 1.0)
    }

    /// Score a chunk in place.
    pub fn score_chunk(&self, chunk: ChunkCandidate) -> ChunkCandidate {
        let score = self.score(&chunk.text);
        chunk.with_score(score)
    }
}

/// Split on anything that is not alphanumeric, lower-case, drop stop words
/// and short tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
}

fn count_overlapping(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }

    let mut count = 0;
    let mut from = 0;
    while let Some(found) = haystack[from..].find(needle) {
        count += 1;
        let at = from + found;
        // Advance by one character so overlapping matches are counted
        let step = haystack[at..].chars().next().map_or(1, char::len_utf8);
        from = at + step;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use proptest::prelude::*;

    fn product_schema() -> SchemaDescriptor {
        SchemaDescriptor::builder()
            .required("title", FieldType::String, "The product's title, as shown.")
            .required("unit_price", FieldType::Float, "Price of the product in USD")
            .build()
            .unwrap()
    }

    #[test]
    fn test_keyword_derivation() {
        let scorer = RelevanceScorer::new(&product_schema());
        assert_eq!(
            scorer.keywords(),
            &["price", "product", "shown", "title", "unit", "usd"]
        );
    }

    #[test]
    fn test_overlapping_count() {
        assert_eq!(count_overlapping("aaaa", "aa"), 3);
        assert_eq!(count_overlapping("éaéa", "éa"), 2);
        assert_eq!(count_overlapping("abc", "xyz"), 0);
    }

    #[test]
    fn test_score_saturates_and_is_bounded() {
        let scorer = RelevanceScorer::new(&product_schema());

        assert_eq!(scorer.score(""), 0.0);
        assert_eq!(scorer.score(&"z".repeat(1000)), 0.0);

        let dense = "Product title price USD ".repeat(20);
        assert_eq!(scorer.score(&dense), 1.0);

        // One hit in 1 000 characters is half of the saturation density
        let sparse = format!("{}{}", "price", "z".repeat(995));
        assert!((scorer.score(&sparse) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let scorer = RelevanceScorer::new(&product_schema());
        assert_eq!(scorer.hits("PRICE Price price"), 3);
    }

    #[test]
    fn test_dense_window_outranks_sparse() {
        let scorer = RelevanceScorer::new(&product_schema());
        let noise = "lorem ipsum dolor sit amet ".repeat(40);
        let relevant = format!("{} product title price", noise);
        assert!(scorer.score(&relevant) > scorer.score(&noise));
    }

    proptest! {
        #[test]
        fn prop_score_is_pure(text in ".{0,300}") {
            let scorer = RelevanceScorer::new(&product_schema());
            let first = scorer.score(&text);
            let second = RelevanceScorer::new(&product_schema()).score(&text);
            prop_assert_eq!(first.to_bits(), second.to_bits());
            prop_assert!((0.0..=1.0).contains(&first));
        }
    }
}
