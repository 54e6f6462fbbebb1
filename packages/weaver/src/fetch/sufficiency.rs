//! Heuristic deciding whether cheap HTML is usable or a JS-gated placeholder.
//!
//! Checks, in order:
//! - the page is at least `min_length` characters
//! - it has a `<body>`
//! - no framework mount point (`#root`, `#app`, ...) is empty
//! - its visible text carries no placeholder marker ("please enable javascript")
//! - its visible text is at least `min_body_text` characters, when enabled
//!
//! Visible text excludes `<script>`, `<style>`, `<noscript>` and `<template>`.

use ::scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::config::SufficiencyConfig;
use crate::error::ErrorKind;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Why a page was judged insufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Insufficiency {
    TooShort { length: usize, min: usize },
    NoBody,
    EmptyAppRoot { selector: String },
    PlaceholderMarker { marker: String },
    TooLittleText { chars: usize, min: usize },
}

impl Insufficiency {
    /// Always `RenderRequired`: insufficiency is a fallback trigger, not a failure.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RenderRequired
    }
}

impl fmt::Display for Insufficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insufficiency::TooShort { length, min } => {
                write!(f, "page is {} chars, below the {} char minimum", length, min)
            }
            Insufficiency::NoBody => f.write_str("page has no <body>"),
            Insufficiency::EmptyAppRoot { selector } => {
                write!(f, "app mount point {} has no rendered content", selector)
            }
            Insufficiency::PlaceholderMarker { marker } => {
                write!(f, "page shows placeholder text {:?}", marker)
            }
            Insufficiency::TooLittleText { chars, min } => {
                write!(f, "page has {} chars of visible text, below {}", chars, min)
            }
        }
    }
}

/// Compiled sufficiency rules.
#[derive(Debug, Clone)]
pub struct SufficiencyCheck {
    min_length: usize,
    min_body_text: usize,
    markers: Vec<String>,
    app_roots: Vec<(String, Selector)>,
    body: Option<Selector>,
}

impl SufficiencyCheck {
    /// Compile a configuration. Selectors that fail to parse are skipped.
    pub fn new(config: &SufficiencyConfig) -> Self {
        let app_roots = config
            .app_root_selectors
            .iter()
            .filter_map(|raw| match Selector::parse(raw) {
                Ok(selector) => Some((raw.clone(), selector)),
                Err(e) => {
                    warn!(selector = %raw, error = ?e, "Ignoring invalid app root selector");
                    None
                }
            })
            .collect();

        Self {
            min_length: config.min_length,
            min_body_text: config.min_body_text,
            markers: config
                .placeholder_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.trim().is_empty())
                .collect(),
            app_roots,
            body: Selector::parse("body").ok(),
        }
    }

    /// `Ok(())` if the page is usable as-is.
    pub fn check(&self, html: &str) -> Result<(), Insufficiency> {
        let length = html.chars().count();
        if length < self.min_length {
            return Err(Insufficiency::TooShort {
                length,
                min: self.min_length,
            });
        }

        if !html.to_ascii_lowercase().contains("<body") {
            return Err(Insufficiency::NoBody);
        }

        let document = Html::parse_document(html);

        for (raw, selector) in &self.app_roots {
            if let Some(root) = document.select(selector).next() {
                if is_unrendered(root) {
                    return Err(Insufficiency::EmptyAppRoot {
                        selector: raw.clone(),
                    });
                }
            }
        }

        let text = self.visible_text(&document);
        let lower = text.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| lower.contains(m.as_str())) {
            return Err(Insufficiency::PlaceholderMarker {
                marker: marker.clone(),
            });
        }

        if self.min_body_text > 0 {
            let chars = text.chars().filter(|c| !c.is_whitespace()).count();
            if chars < self.min_body_text {
                return Err(Insufficiency::TooLittleText {
                    chars,
                    min: self.min_body_text,
                });
            }
        }

        Ok(())
    }

    pub fn is_sufficient(&self, html: &str) -> bool {
        self.check(html).is_ok()
    }

    /// Text a reader would see in the body.
    fn visible_text(&self, document: &Html) -> String {
        let Some(body) = self
            .body
            .as_ref()
            .and_then(|selector| document.select(selector).next())
        else {
            return String::new();
        };

        let mut text = String::new();
        for node in body.descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
            });
            if !hidden {
                text.push_str(fragment);
                text.push(' ');
            }
        }
        text
    }
}

impl Default for SufficiencyCheck {
    fn default() -> Self {
        Self::new(&SufficiencyConfig::default())
    }
}

/// A mount point with no child elements and no text.
fn is_unrendered(root: ElementRef<'_>) -> bool {
    let has_elements = root.children().any(|child| child.value().is_element());
    let has_text = root.text().any(|t| !t.trim().is_empty());
    !has_elements && !has_text
}
