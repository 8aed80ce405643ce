//! Runtime configuration.
//!
//! A single [`Config`] is built at startup from an optional TOML file plus
//! command line overrides, then handed by reference to every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::target::SourceKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dictionary: DictionaryConfig,
    pub crawler: CrawlerConfig,
    pub search: SearchConfig,
    pub log: LogConfig,
    pub targets: Vec<TargetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("./data/store") }
    }
}

/// Dictionary files, highest priority first. All but the last are user dictionaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
    pub paths: Vec<PathBuf>,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                PathBuf::from("./data/programming.txt"),
                PathBuf::from("./data/dictionary.txt"),
            ],
        }
    }
}

impl DictionaryConfig {
    /// Parse the comma-separated form used on the command line.
    pub fn from_comma_list(list: &str) -> Self {
        let paths = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { paths }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of concurrent crawl workers.
    pub workers: usize,
    /// Global cap on in-flight HTTP requests.
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Minimum delay between two requests for the same target.
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_body_bytes: usize,
    pub respect_robots: bool,
    /// Upper bound applied to a robots.txt `Crawl-delay`.
    pub max_crawl_delay_ms: u64,
    /// Cooldown after a successful or skipped fetch.
    pub revisit_interval_secs: u64,
    /// First failure cooldown; doubled per consecutive failure.
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Consecutive failures after which a target is disabled.
    pub max_consecutive_failures: u32,
    /// Index accepted documents inside the crawl run instead of leaving them
    /// for the indexer.
    pub index_on_accept: bool,
    /// Upper bound on targets registered from discovered links in one run.
    pub max_discovered_per_run: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_in_flight: 16,
            request_timeout_secs: 12,
            user_agent: "lexi-bot/0.1 (+https://example.com/bot)".into(),
            min_interval_ms: 1_000,
            max_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
            max_body_bytes: 2 * 1024 * 1024,
            respect_robots: true,
            max_crawl_delay_ms: 60_000,
            revisit_interval_secs: 6 * 3600,
            backoff_base_secs: 300,
            backoff_max_secs: 24 * 3600,
            max_consecutive_failures: 5,
            index_on_accept: false,
            max_discovered_per_run: 200,
        }
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.max_crawl_delay_ms)
    }
    pub fn revisit_interval(&self) -> Duration {
        Duration::from_secs(self.revisit_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Documents must contain every query term.
    All,
    /// Documents may contain any query term.
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub mode: QueryMode,
    pub title_boost: f32,
    pub recency_weight: f32,
    pub recency_half_life_days: f32,
    pub snippet_chars: usize,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: QueryMode::All,
            title_boost: 3.0,
            recency_weight: 0.25,
            recency_half_life_days: 30.0,
            snippet_chars: 200,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".into() }
    }
}

/// A crawl source declared in config or a seeds file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    /// Register same-host links found on this page as new targets.
    #[serde(default)]
    pub discover: bool,
}

impl TargetSpec {
    /// Parse a seeds file line: `url [kind] [discover]`.
    /// Blank lines and `#` comments yield `None`.
    pub fn parse_seed_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.split_whitespace();
        let raw = parts.next()?;
        let url = if raw.contains("://") { raw.to_string() } else { format!("https://{raw}") };
        let mut spec = TargetSpec { url, kind: SourceKind::Html, discover: false };
        for flag in parts {
            match flag.to_ascii_lowercase().as_str() {
                "discover" => spec.discover = true,
                other => {
                    if let Some(kind) = SourceKind::parse(other) {
                        spec.kind = kind;
                    }
                }
            }
        }
        Some(spec)
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
        };
        let config: Config = toml::from_str(&text)
            .map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dictionary.paths.is_empty() {
            return Err(ConfigError::Invalid("at least one dictionary path is required".into()));
        }
        if self.crawler.workers == 0 || self.crawler.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "crawler.workers and crawler.max_in_flight must be positive".into(),
            ));
        }
        if self.crawler.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "crawler.max_consecutive_failures must be positive".into(),
            ));
        }
        if self.search.recency_half_life_days <= 0.0 {
            return Err(ConfigError::Invalid(
                "search.recency_half_life_days must be positive".into(),
            ));
        }
        Ok(())
    }
}
