//! Configuration types for catalog-harvester

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder substituted with the item identifier in endpoint templates
pub const ID_PLACEHOLDER: &str = "{id}";

/// Main configuration for the harvester
///
/// Fields are organized into logical sub-configs:
/// - [`endpoints`](EndpointConfig) - sitemap and per-item API URLs
/// - [`session`](SessionConfig) - HTTP client construction and retry policy
/// - [`fetch`](FetchConfig) - per-call timeouts and request pacing
/// - [`dispatch`](DispatchConfig) - worker pool, chunking and batching
/// - [`output`](OutputConfig) - where records are persisted
///
/// Every sub-config has defaults, so `{}` is a complete configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoints
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// HTTP session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Per-item fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Scheduler settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing sections and fields fall back to their defaults. The loaded
    /// configuration is validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.concurrency == 0 {
            return Err(Error::config(
                "dispatch.concurrency",
                "concurrency must be greater than zero",
            ));
        }
        if self.dispatch.chunk_size == 0 {
            return Err(Error::config(
                "dispatch.chunk_size",
                "chunk size must be greater than zero",
            ));
        }
        if self.dispatch.batch_size == 0 {
            return Err(Error::config(
                "dispatch.batch_size",
                "batch size must be greater than zero",
            ));
        }
        if self.dispatch.channel_capacity == 0 {
            return Err(Error::config(
                "dispatch.channel_capacity",
                "channel capacity must be greater than zero",
            ));
        }
        if self.fetch.pause_min > self.fetch.pause_max {
            return Err(Error::config(
                "fetch.pause_min",
                "pause_min must not exceed pause_max",
            ));
        }
        for (key, template) in [
            ("endpoints.product_url", &self.endpoints.product_url),
            ("endpoints.related_url", &self.endpoints.related_url),
            ("endpoints.code_lookup_url", &self.endpoints.code_lookup_url),
        ] {
            if !template.contains(ID_PLACEHOLDER) {
                return Err(Error::config(
                    key,
                    format!("template must contain {ID_PLACEHOLDER}: {template}"),
                ));
            }
        }
        Ok(())
    }
}

/// Remote endpoint configuration
///
/// Item templates are plain strings in which every `{id}` is replaced by the
/// item identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Sitemap documents listing the item URLs
    #[serde(default = "default_sitemap_urls")]
    pub sitemap_urls: Vec<String>,

    /// Primary item record
    #[serde(default = "default_product_url")]
    pub product_url: String,

    /// Related-items enrichment
    #[serde(default = "default_related_url")]
    pub related_url: String,

    /// Supplementary code lookup
    #[serde(default = "default_code_lookup_url")]
    pub code_lookup_url: String,
}

impl EndpointConfig {
    /// Point every endpoint at the same base URL, keeping the default paths
    ///
    /// Convenient for tests and mirrors that expose the catalog API under a
    /// single host.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            sitemap_urls: vec![format!("{base}/sitemaps/products.xml")],
            product_url: format!("{base}/product/{ID_PLACEHOLDER}"),
            related_url: format!(
                "{base}/recommendations/freqpurchasedtogether?productId={ID_PLACEHOLDER}&pageSize=2&page=1"
            ),
            code_lookup_url: format!("{base}/ugc/api/product/{ID_PLACEHOLDER}"),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sitemap_urls: default_sitemap_urls(),
            product_url: default_product_url(),
            related_url: default_related_url(),
            code_lookup_url: default_code_lookup_url(),
        }
    }
}

/// HTTP session configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport retry policy for transient failures (429, 5xx, timeouts)
    #[serde(default)]
    pub retry: RetryConfig,

    /// Maximum idle connections kept per host by each session (default: 20)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// TCP connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent strings; each session picks one at random
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            connect_timeout: default_connect_timeout(),
            user_agents: default_user_agents(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds (default: 500)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries, in milliseconds (default: 10000)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
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

/// Per-item fetch configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout of the primary record call, in seconds (default: 15)
    #[serde(default = "default_primary_timeout", with = "duration_serde")]
    pub primary_timeout: Duration,

    /// Timeout of the related-items call, in seconds (default: 10)
    #[serde(default = "default_related_timeout", with = "duration_serde")]
    pub related_timeout: Duration,

    /// Timeout of the code lookup call, in seconds (default: 8)
    #[serde(default = "default_code_lookup_timeout", with = "duration_serde")]
    pub code_lookup_timeout: Duration,

    /// Lower bound of the pause after each item, in milliseconds (default: 100)
    #[serde(default = "default_pause_min", with = "duration_ms_serde")]
    pub pause_min: Duration,

    /// Upper bound of the pause after each item, in milliseconds (default: 300)
    #[serde(default = "default_pause_max", with = "duration_ms_serde")]
    pub pause_max: Duration,

    /// Log a progress line every N successful items (default: 500, 0 disables)
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            primary_timeout: default_primary_timeout(),
            related_timeout: default_related_timeout(),
            code_lookup_timeout: default_code_lookup_timeout(),
            pause_min: default_pause_min(),
            pause_max: default_pause_max(),
            progress_every: default_progress_every(),
        }
    }
}

/// Dispatch scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of items fetched concurrently (default: 45)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of identifiers submitted per chunk (default: 1000)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of payloads per emitted batch (default: 500)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Outer bound on a single item task, in seconds (default: 30)
    #[serde(default = "default_task_timeout", with = "duration_serde")]
    pub task_timeout: Duration,

    /// Pause between chunks, in milliseconds (default: 1000)
    #[serde(default = "default_chunk_pause", with = "duration_ms_serde")]
    pub chunk_pause: Duration,

    /// Release idle buffers every N chunks (default: 4, 0 disables)
    #[serde(default = "default_reclaim_every_chunks")]
    pub reclaim_every_chunks: usize,

    /// Batches buffered between the scheduler and the consumer (default: 2)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
            task_timeout: default_task_timeout(),
            chunk_pause: default_chunk_pause(),
            reclaim_every_chunks: default_reclaim_every_chunks(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Output configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the output files, created if missing (default: ".")
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// JSON array file name (default: "iherb_data.json")
    #[serde(default = "default_json_file")]
    pub json_file: String,

    /// XML document file name (default: "iherb_data.xml")
    #[serde(default = "default_xml_file")]
    pub xml_file: String,

    /// Append records to the JSON file (default: true)
    #[serde(default = "default_true")]
    pub write_json: bool,

    /// Append records to the XML file (default: true)
    #[serde(default = "default_true")]
    pub write_xml: bool,
}

impl OutputConfig {
    /// Full path of the JSON output file
    pub fn json_path(&self) -> PathBuf {
        self.directory.join(&self.json_file)
    }

    /// Full path of the XML output file
    pub fn xml_path(&self) -> PathBuf {
        self.directory.join(&self.xml_file)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            json_file: default_json_file(),
            xml_file: default_xml_file(),
            write_json: true,
            write_xml: true,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_sitemap_urls() -> Vec<String> {
    vec!["https://www.iherb.com/sitemaps/products-0-www-0.xml".to_string()]
}

fn default_product_url() -> String {
    "https://catalog.app.iherb.com/product/{id}".to_string()
}

fn default_related_url() -> String {
    "https://catalog.app.iherb.com/recommendations/freqpurchasedtogether?productId={id}&pageSize=2&page=1"
        .to_string()
}

fn default_code_lookup_url() -> String {
    "https://www.iherb.com/ugc/api/product/{id}".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    20
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0".into(),
    ]
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_primary_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_related_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_code_lookup_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_pause_min() -> Duration {
    Duration::from_millis(100)
}

fn default_pause_max() -> Duration {
    Duration::from_millis(300)
}

fn default_progress_every() -> u64 {
    500
}

fn default_concurrency() -> usize {
    45
}

fn default_chunk_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    500
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_chunk_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_reclaim_every_chunks() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_json_file() -> String {
    "iherb_data.json".to_string()
}

fn default_xml_file() -> String {
    "iherb_data.xml".to_string()
}

// Duration serialization helper (whole seconds)
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

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("empty config should parse");

        assert_eq!(config.dispatch.concurrency, 45);
        assert_eq!(config.dispatch.chunk_size, 1000);
        assert_eq!(config.dispatch.batch_size, 500);
        assert_eq!(config.dispatch.task_timeout, Duration::from_secs(30));
        assert_eq!(config.session.retry.max_attempts, 2);
        assert_eq!(config.session.pool_max_idle_per_host, 20);
        assert_eq!(config.fetch.primary_timeout, Duration::from_secs(15));
        assert_eq!(config.fetch.code_lookup_timeout, Duration::from_secs(8));
        assert!(config.output.write_json);
        assert!(config.output.write_xml);
        config.validate().expect("defaults must be valid");
    }

    #[test]
    fn partial_section_keeps_remaining_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"dispatch": {"concurrency": 4, "batch_size": 2}}"#).unwrap();

        assert_eq!(config.dispatch.concurrency, 4);
        assert_eq!(config.dispatch.batch_size, 2);
        assert_eq!(config.dispatch.chunk_size, 1000);
        assert_eq!(config.dispatch.chunk_pause, Duration::from_secs(1));
    }

    #[test]
    fn millisecond_fields_round_trip_as_integers() {
        let config = FetchConfig {
            pause_min: Duration::from_millis(150),
            pause_max: Duration::from_millis(450),
            ..FetchConfig::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["pause_min"], 150);
        assert_eq!(json["pause_max"], 450);
        assert_eq!(json["primary_timeout"], 15);

        let back: FetchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.pause_min, Duration::from_millis(150));
        assert_eq!(back.pause_max, Duration::from_millis(450));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.dispatch.concurrency = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("dispatch.concurrency"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.dispatch.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_pause_bounds() {
        let mut config = Config::default();
        config.fetch.pause_min = Duration::from_millis(500);
        config.fetch.pause_max = Duration::from_millis(100);

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("fetch.pause_min")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let mut config = Config::default();
        config.endpoints.related_url = "https://catalog.example/recommendations".to_string();

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("endpoints.related_url"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn with_base_rewrites_every_endpoint() {
        let endpoints = EndpointConfig::with_base("http://127.0.0.1:9000/");

        assert_eq!(
            endpoints.sitemap_urls,
            vec!["http://127.0.0.1:9000/sitemaps/products.xml".to_string()]
        );
        assert_eq!(endpoints.product_url, "http://127.0.0.1:9000/product/{id}");
        assert!(endpoints.related_url.starts_with("http://127.0.0.1:9000/recommendations/"));
        assert_eq!(
            endpoints.code_lookup_url,
            "http://127.0.0.1:9000/ugc/api/product/{id}"
        );
    }

    #[test]
    fn from_file_loads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.json");
        std::fs::write(&path, r#"{"output": {"directory": "out", "write_xml": false}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output.directory, PathBuf::from("out"));
        assert!(!config.output.write_xml);
        assert_eq!(config.output.json_path(), PathBuf::from("out/iherb_data.json"));

        std::fs::write(&path, r#"{"dispatch": {"chunk_size": 0}}"#).unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn from_file_reports_missing_file_as_config_error() {
        let result = Config::from_file(Path::new("/nonexistent/harvester.json"));
        assert!(matches!(result, Err(Error::Config { key: None, .. })));
    }
}
