//! Configuration types for extraction, fetching and the scraper facade.
//!
//! Every knob has a documented default. [`ScraperConfig::from_env`] layers
//! `WEAVER_*` environment variables (and a `.env` file, if present) on top
//! of those defaults.

use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::attempt::AttemptParams;
use crate::chunk::{ChunkPlanner, DEFAULT_OVERLAP, DEFAULT_WINDOW_SIZE};
use crate::error::ConfigError;

/// Configuration for the extraction orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Window size in characters; also the single-attempt threshold.
    ///
    /// Default: 15 000.
    pub window_size: usize,

    /// Overlap between consecutive windows in characters. Default: 1 000.
    pub overlap: usize,

    /// Windows scoring strictly above this are attempted. Default: 0.4.
    pub relevance_threshold: f32,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum output tokens per attempt. Default: 4096.
    pub max_tokens: u32,

    /// Upper bound on one generation call. Default: 120 s.
    pub inference_timeout: Duration,

    /// Cap on attempts per document (None = every selected window).
    pub max_attempts: Option<usize>,

    /// Drop scripts, styles, inline SVG and comments before chunking.
    ///
    /// Offsets then refer to the stripped text. Default: false.
    pub strip_noise: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: DEFAULT_OVERLAP,
            relevance_threshold: 0.4,
            temperature: 0.2,
            max_tokens: 4096,
            inference_timeout: Duration::from_secs(120),
            max_attempts: None,
            strip_noise: false,
        }
    }
}

impl WeaverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set window size and overlap together.
    pub fn with_window(mut self, window_size: usize, overlap: usize) -> Self {
        self.window_size = window_size;
        self.overlap = overlap;
        self
    }

    pub fn with_relevance_threshold(mut self, threshold: f32) -> Self {
        self.relevance_threshold = threshold;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_strip_noise(mut self, strip: bool) -> Self {
        self.strip_noise = strip;
        self
    }

    /// Check invariants: non-zero window, overlap below window, threshold in [0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.planner()?;
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.relevance_threshold));
        }
        Ok(())
    }

    /// Chunk planner for these window settings.
    pub fn planner(&self) -> Result<ChunkPlanner, ConfigError> {
        ChunkPlanner::new(self.window_size, self.overlap)
    }

    /// Sampling parameters for each attempt.
    pub fn attempt_params(&self) -> AttemptParams {
        AttemptParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.inference_timeout,
        }
    }
}

/// Rules deciding whether cheap HTML is usable or a JS-gated placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SufficiencyConfig {
    /// Pages shorter than this many characters are insufficient. Default: 500.
    pub min_length: usize,

    /// Minimum visible body text in characters (0 = check disabled).
    pub min_body_text: usize,

    /// Case-insensitive substrings that mark a placeholder page.
    pub placeholder_markers: Vec<String>,

    /// CSS selectors of framework mount points; an empty one means the
    /// page was never rendered.
    pub app_root_selectors: Vec<String>,
}

impl Default for SufficiencyConfig {
    fn default() -> Self {
        Self {
            min_length: 500,
            min_body_text: 0,
            placeholder_markers: vec![
                "you need to enable javascript".to_string(),
                "please enable javascript".to_string(),
                "javascript is required".to_string(),
                "enable javascript to continue".to_string(),
            ],
            app_root_selectors: ["#root", "#app", "#__next", "#__nuxt", "[data-reactroot]", "app-root"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SufficiencyConfig {
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_min_body_text(mut self, min_body_text: usize) -> Self {
        self.min_body_text = min_body_text;
        self
    }

    pub fn with_placeholder_marker(mut self, marker: impl Into<String>) -> Self {
        self.placeholder_markers.push(marker.into());
        self
    }

    pub fn with_app_root_selector(mut self, selector: impl Into<String>) -> Self {
        self.app_root_selectors.push(selector.into());
        self
    }
}

/// Configuration for the fetch layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Cheap fetch timeout. Default: 30 s.
    pub timeout: Duration,

    /// Rendered fetch timeout. Default: 60 s.
    pub render_timeout: Duration,

    /// Settle time after page load when rendering. Default: 3.5 s.
    pub wait_time: Option<Duration>,

    /// CSS selector the renderer waits for.
    pub wait_selector: Option<String>,

    pub sufficiency: SufficiencyConfig,

    /// Throttle for the cheap transport (None = unthrottled).
    pub requests_per_second: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(60),
            wait_time: Some(Duration::from_millis(3500)),
            wait_selector: None,
            sufficiency: SufficiencyConfig::default(),
            requests_per_second: None,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_wait_time(mut self, wait: Option<Duration>) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn with_wait_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_selector = Some(selector.into());
        self
    }

    pub fn with_sufficiency(mut self, sufficiency: SufficiencyConfig) -> Self {
        self.sufficiency = sufficiency;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = Some(rps);
        self
    }
}

/// An API key that won't be logged or displayed.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when actually using the key.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Default model served by a local OpenAI-compatible inference server.
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct-1M";

/// Default base URL of that server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";

/// Top-level configuration for the [`Scraper`](crate::scraper::Scraper).
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub weaver: WeaverConfig,
    pub fetch: FetchConfig,

    /// Escalate to the renderer on insufficient or empty results. Default: true.
    pub auto_fallback: bool,

    /// Share of empty fields at which a cheap-path result counts as empty. Default: 0.8.
    pub empty_ratio_threshold: f32,

    /// Concurrent fetches in `scrape_many`. Default: 4.
    pub concurrency: usize,

    pub model: String,
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub firecrawl_api_key: Option<ApiKey>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            weaver: WeaverConfig::default(),
            fetch: FetchConfig::default(),
            auto_fallback: true,
            empty_ratio_threshold: 0.8,
            concurrency: 4,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            firecrawl_api_key: None,
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weaver(mut self, weaver: WeaverConfig) -> Self {
        self.weaver = weaver;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    pub fn with_empty_ratio_threshold(mut self, threshold: f32) -> Self {
        self.empty_ratio_threshold = threshold;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weaver.validate()?;
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !(0.0..=1.0).contains(&self.empty_ratio_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.empty_ratio_threshold));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// Loads `.env` if present; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvReader(&lookup);

        if let Some(model) = lookup("WEAVER_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = lookup("WEAVER_BASE_URL") {
            config.base_url = base_url;
        }
        config.api_key = lookup("WEAVER_API_KEY").map(ApiKey::new);
        config.firecrawl_api_key = lookup("FIRECRAWL_API_KEY").map(ApiKey::new);

        if let Some(v) = env.parse("WEAVER_WINDOW_SIZE")? {
            config.weaver.window_size = v;
        }
        if let Some(v) = env.parse("WEAVER_OVERLAP")? {
            config.weaver.overlap = v;
        }
        if let Some(v) = env.parse("WEAVER_RELEVANCE_THRESHOLD")? {
            config.weaver.relevance_threshold = v;
        }
        if let Some(v) = env.parse("WEAVER_TEMPERATURE")? {
            config.weaver.temperature = v;
        }
        if let Some(v) = env.parse("WEAVER_MAX_TOKENS")? {
            config.weaver.max_tokens = v;
        }
        if let Some(secs) = env.parse("WEAVER_INFERENCE_TIMEOUT_SECS")? {
            config.weaver.inference_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse("WEAVER_FETCH_TIMEOUT_SECS")? {
            config.fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env.parse("WEAVER_MIN_HTML_LENGTH")? {
            config.fetch.sufficiency.min_length = v;
        }
        if let Some(v) = env.parse("WEAVER_CONCURRENCY")? {
            config.concurrency = v;
        }

        config.validate()?;
        Ok(config)
    }
}

struct EnvReader<'a, F>(&'a F);

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    key: key.to_string(),
                    value: raw,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert_eq!(config.weaver.window_size, 15_000);
        assert_eq!(config.weaver.overlap, 1_000);
        assert_eq!(config.weaver.relevance_threshold, 0.4);
        assert_eq!(config.fetch.sufficiency.min_length, 500);
        assert!(config.auto_fallback);
        assert_eq!(config.concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(
            WeaverConfig::new().with_window(0, 0).validate(),
            Err(ConfigError::ZeroWindow)
        );
        assert!(matches!(
            WeaverConfig::new().with_window(100, 100).validate(),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
        assert_eq!(
            WeaverConfig::new().with_relevance_threshold(1.5).validate(),
            Err(ConfigError::ThresholdOutOfRange(1.5))
        );
        assert_eq!(
            ScraperConfig::new().with_concurrency(0).validate(),
            Err(ConfigError::ZeroConcurrency)
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ScraperConfig::from_lookup(lookup(&[
            ("WEAVER_MODEL", "llama3"),
            ("WEAVER_WINDOW_SIZE", "8000"),
            ("WEAVER_OVERLAP", "500"),
            ("WEAVER_INFERENCE_TIMEOUT_SECS", "30"),
            ("WEAVER_MIN_HTML_LENGTH", "200"),
            ("WEAVER_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.model, "llama3");
        assert_eq!(config.weaver.window_size, 8000);
        assert_eq!(config.weaver.overlap, 500);
        assert_eq!(config.weaver.inference_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch.sufficiency.min_length, 200);
        assert_eq!(config.api_key.as_ref().map(ApiKey::expose), Some("sk-test"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ScraperConfig::from_lookup(lookup(&[("WEAVER_CONCURRENCY", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                key: "WEAVER_CONCURRENCY".into(),
                value: "many".into()
            }
        );
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("sk-secret");
        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(key.clone().expose(), "sk-secret");
    }

    #[test]
    fn test_weaver_config_deserializes_with_defaults() {
        let config: WeaverConfig = serde_json::from_str(r#"{"window_size": 2000, "overlap": 100}"#).unwrap();
        assert_eq!(config.window_size, 2000);
        assert_eq!(config.relevance_threshold, 0.4);
    }
}
