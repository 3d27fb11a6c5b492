//! Test configuration helpers pointing a harvester at a mock catalog

use catalog_harvester::{Config, EndpointConfig, RetryConfig};
use std::path::Path;
use std::time::Duration;

/// Configuration for a fast run against `base_url`, writing into `output_dir`
///
/// Pauses are zeroed, transport retries are disabled and timeouts are short so
/// that failure paths resolve quickly.
pub fn test_config(base_url: &str, output_dir: &Path) -> Config {
    let mut config = Config {
        endpoints: EndpointConfig::with_base(base_url),
        ..Config::default()
    };

    config.session.retry = RetryConfig::disabled();

    config.fetch.primary_timeout = Duration::from_secs(5);
    config.fetch.related_timeout = Duration::from_secs(5);
    config.fetch.code_lookup_timeout = Duration::from_secs(5);
    config.fetch.pause_min = Duration::ZERO;
    config.fetch.pause_max = Duration::ZERO;

    config.dispatch.concurrency = 2;
    config.dispatch.batch_size = 2;
    config.dispatch.chunk_size = 100;
    config.dispatch.chunk_pause = Duration::ZERO;
    config.dispatch.task_timeout = Duration::from_secs(10);

    config.output.directory = output_dir.to_path_buf();
    config
}

/// Same as [`test_config`] with a fast transport retry policy enabled
pub fn test_config_with_retry(base_url: &str, output_dir: &Path, max_attempts: u32) -> Config {
    let mut config = test_config(base_url, output_dir);
    config.session.retry = RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}
