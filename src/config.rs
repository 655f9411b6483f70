//! Configuration types for vulnfeed-sync
//!
//! Configuration is layered: serde defaults, then an optional JSON file
//! ([`Config::from_file`]), then `VULNFEED_*` environment variables
//! ([`Config::merge_env`]), then command-line flags. The resulting [`Config`]
//! is handed to the orchestrator at construction; nothing is read from
//! process-wide state afterwards.

use crate::error::{Error, Result};
use crate::feed::FeedFamily;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Feed source settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Which feed family to synchronize (default: nvd)
    #[serde(default)]
    pub family: FeedFamily,

    /// NVD data-feeds page scanned for artifact names
    #[serde(default = "default_nvd_listing_url")]
    pub listing_url: String,

    /// Base URL NVD artifact names are resolved against
    #[serde(default = "default_nvd_download_base")]
    pub download_base: String,

    /// Regular expression matching NVD artifact names in the listing page
    #[serde(default = "default_nvd_artifact_pattern")]
    pub artifact_pattern: String,

    /// Vulners archive endpoint; the collection tag is appended verbatim
    #[serde(default = "default_vulners_archive_base")]
    pub archive_base: String,

    /// Vulners collections to download
    #[serde(default = "default_vulners_collections")]
    pub collections: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            family: FeedFamily::default(),
            listing_url: default_nvd_listing_url(),
            download_base: default_nvd_download_base(),
            artifact_pattern: default_nvd_artifact_pattern(),
            archive_base: default_vulners_archive_base(),
            collections: default_vulners_collections(),
        }
    }
}

/// Destination store settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory (default: "nvd" or "vulners" depending on the family)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Subdirectory of the store that expanded members are written to
    /// (None = alongside the containers)
    #[serde(default)]
    pub extract_subdir: Option<PathBuf>,

    /// Where to write the tab-separated hash manifest after a run
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

/// How staleness is checked before committing to a download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessProbe {
    /// Send a HEAD request first, fall back to the GET response headers (default)
    #[default]
    Head,
    /// Only compare against the GET response headers
    InlineOnly,
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Client identifier sent as User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout covering connect and body (default: 120 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Staleness probe strategy
    #[serde(default)]
    pub staleness_probe: StalenessProbe,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: default_http_timeout(),
            staleness_probe: StalenessProbe::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for a sync run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Feed source
    #[serde(default)]
    pub feed: FeedConfig,

    /// Destination store
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP client
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry policy for downloads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Locators processed concurrently (default: 1, sequential)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            store: StoreConfig::default(),
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl Config {
    /// Default configuration for the given feed family
    pub fn for_family(family: FeedFamily) -> Self {
        let mut config = Self::default();
        config.feed.family = family;
        config
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config {
            message: format!("failed to parse config: {}", e),
            key: None,
        })
    }

    /// Apply `VULNFEED_*` environment overrides
    pub fn merge_env(self) -> Self {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    fn merge_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("VULNFEED_FEED")
            && let Ok(family) = val.parse()
        {
            self.feed.family = family;
        }
        if let Some(val) = var("VULNFEED_STORE_DIR") {
            self.store.store_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = var("VULNFEED_USER_AGENT") {
            self.http.user_agent = val;
        }
        if let Some(val) = var("VULNFEED_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            self.http.timeout = Duration::from_secs(secs);
        }
        if let Some(val) = var("VULNFEED_MAX_CONCURRENT_FETCHES")
            && let Ok(n) = val.parse()
        {
            self.max_concurrent_fetches = n;
        }
        self
    }

    /// Effective store directory
    pub fn store_dir(&self) -> PathBuf {
        self.store
            .store_dir
            .clone()
            .unwrap_or_else(|| self.feed.family.default_store_dir())
    }

    /// Directory expanded container members are written to
    pub fn extract_dir(&self) -> PathBuf {
        let store_dir = self.store_dir();
        match &self.store.extract_subdir {
            Some(sub) => store_dir.join(sub),
            None => store_dir,
        }
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(Error::config(
                "must be at least 1",
                "max_concurrent_fetches",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "must be a finite number of at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.http.timeout.is_zero() {
            return Err(Error::config("must be greater than zero", "http.timeout"));
        }
        if let Some(sub) = &self.store.extract_subdir
            && (sub.is_absolute()
                || sub
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir)))
        {
            return Err(Error::config(
                "must be a relative path inside the store",
                "store.extract_subdir",
            ));
        }

        match self.feed.family {
            FeedFamily::Nvd => {
                url::Url::parse(&self.feed.listing_url).map_err(|e| {
                    Error::config(format!("invalid URL: {}", e), "feed.listing_url")
                })?;
                url::Url::parse(&self.feed.download_base).map_err(|e| {
                    Error::config(format!("invalid URL: {}", e), "feed.download_base")
                })?;
                regex::Regex::new(&self.feed.artifact_pattern).map_err(|e| {
                    Error::config(format!("invalid pattern: {}", e), "feed.artifact_pattern")
                })?;
            }
            FeedFamily::VulnersArchive => {
                url::Url::parse(&self.feed.archive_base).map_err(|e| {
                    Error::config(format!("invalid URL: {}", e), "feed.archive_base")
                })?;
                if self.feed.collections.is_empty() {
                    return Err(Error::config(
                        "at least one collection is required",
                        "feed.collections",
                    ));
                }
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_nvd_listing_url() -> String {
    "https://nvd.nist.gov/vuln/data-feeds".to_string()
}

fn default_nvd_download_base() -> String {
    "https://static.nvd.nist.gov/feeds/json/cve/1.1/".to_string()
}

fn default_nvd_artifact_pattern() -> String {
    r"nvdcve-1\.1-[0-9]+\.json\.zip".to_string()
}

fn default_vulners_archive_base() -> String {
    "https://vulners.com/api/v3/archive/collection/?type=".to_string()
}

fn default_vulners_collections() -> Vec<String> {
    [
        "cnvd",
        "dsquare",
        "exploitdb",
        "exploitpack",
        "metasploit",
        "packetstorm",
        "saint",
        "seebug",
        "srcincite",
        "vulnerlab",
        "wpexploit",
        "zdt",
        "zeroscience",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_user_agent() -> String {
    format!("vulnfeed-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_concurrent_fetches() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
