//! Per-item fetch-and-merge protocol
//!
//! For one identifier the [`ItemFetcher`] issues, in order:
//!
//! 1. the primary record call, which is required: any failure makes the item
//!    unavailable and counts as a failure;
//! 2. the related-items call, best effort;
//! 3. the code lookup call, best effort.
//!
//! The three results are combined by [`merge`], which is a pure function.
//! After each item, successful or not, the fetcher pauses for a random delay
//! within the configured bounds to smooth the request rate.

use crate::config::{EndpointConfig, FetchConfig, ID_PLACEHOLDER};
use crate::counters::Counters;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{CallOutcome, ItemId, RELATED_PRODUCTS_KEY, RawPayload, SkipReason, UPC_CODE_KEY};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Fetches one item through a worker's session
///
/// Implementations return `None` when the item is unavailable; that is an
/// expected outcome, not an error. The dispatcher only depends on this trait.
#[async_trait]
pub trait FetchItem: Send + Sync {
    /// Fetch and enrich the item identified by `item_id`
    async fn fetch(&self, item_id: &ItemId, session: &Session) -> Option<RawPayload>;
}

/// Fill an endpoint template with an item identifier
pub fn item_url(template: &str, item_id: &ItemId) -> String {
    template.replace(ID_PLACEHOLDER, item_id.as_str())
}

/// Combine the three call results for one item
///
/// The related-items fragment is always attached under
/// [`RELATED_PRODUCTS_KEY`], as null when the call was skipped. A code lookup
/// fragment overwrites [`UPC_CODE_KEY`] only when it carries a non-empty code.
pub fn merge(
    item_id: ItemId,
    mut primary: Map<String, Value>,
    related: CallOutcome<Value>,
    code_lookup: CallOutcome<Value>,
) -> RawPayload {
    if let Some(code) = code_lookup
        .fetched()
        .as_ref()
        .and_then(|fragment| fragment.get(UPC_CODE_KEY))
        .filter(|code| has_code(code))
    {
        primary.insert(UPC_CODE_KEY.to_string(), code.clone());
    }

    primary.insert(
        RELATED_PRODUCTS_KEY.to_string(),
        related.fetched().unwrap_or(Value::Null),
    );

    RawPayload {
        item_id,
        record: primary,
    }
}

fn has_code(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) => true,
        _ => false,
    }
}

/// The production [`FetchItem`] implementation
pub struct ItemFetcher {
    endpoints: EndpointConfig,
    config: FetchConfig,
    counters: Arc<Counters>,
}

impl ItemFetcher {
    /// Create a fetcher that reports outcomes to `counters`
    pub fn new(endpoints: EndpointConfig, config: FetchConfig, counters: Arc<Counters>) -> Self {
        Self {
            endpoints,
            config,
            counters,
        }
    }

    async fn fetch_and_merge(&self, item_id: &ItemId, session: &Session) -> Result<RawPayload> {
        let primary = self.fetch_primary(item_id, session).await?;

        let related = self
            .best_effort(
                session,
                &item_url(&self.endpoints.related_url, item_id),
                self.config.related_timeout,
            )
            .await;
        if let CallOutcome::Skipped(reason) = &related {
            tracing::debug!(item_id = %item_id, reason = %reason, "related items unavailable");
        }

        let code_lookup = self
            .best_effort(
                session,
                &item_url(&self.endpoints.code_lookup_url, item_id),
                self.config.code_lookup_timeout,
            )
            .await;
        if let CallOutcome::Skipped(reason) = &code_lookup {
            tracing::debug!(item_id = %item_id, reason = %reason, "code lookup unavailable");
        }

        Ok(merge(item_id.clone(), primary, related, code_lookup))
    }

    async fn fetch_primary(&self, item_id: &ItemId, session: &Session) -> Result<Map<String, Value>> {
        let url = item_url(&self.endpoints.product_url, item_id);
        match session.get_json(&url, self.config.primary_timeout).await? {
            Value::Object(record) => Ok(record),
            other => Err(Error::InvalidPayload {
                url,
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    async fn best_effort(&self, session: &Session, url: &str, timeout: Duration) -> CallOutcome<Value> {
        match session.get_json(url, timeout).await {
            Ok(value) => CallOutcome::Fetched(value),
            Err(e) => CallOutcome::Skipped(SkipReason::from(&e)),
        }
    }

    async fn pause(&self) {
        let (min, max) = (self.config.pause_min, self.config.pause_max);
        let delay = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl FetchItem for ItemFetcher {
    async fn fetch(&self, item_id: &ItemId, session: &Session) -> Option<RawPayload> {
        let outcome = self.fetch_and_merge(item_id, session).await;
        self.pause().await;

        match outcome {
            Ok(payload) => {
                let counts = self.counters.record_success();
                if self.config.progress_every > 0
                    && counts.succeeded % self.config.progress_every == 0
                {
                    tracing::info!(
                        succeeded = counts.succeeded,
                        failed = counts.failed,
                        "fetch progress"
                    );
                }
                Some(payload)
            }
            Err(e) => {
                self.counters.record_failure();
                tracing::warn!(item_id = %item_id, slot = session.slot(), error = %e, "item unavailable");
                None
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SessionConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn id(raw: &str) -> ItemId {
        ItemId::from_link(raw).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fixture must be an object"),
        }
    }

    fn quick_fetch_config() -> FetchConfig {
        FetchConfig {
            primary_timeout: Duration::from_secs(5),
            related_timeout: Duration::from_secs(5),
            code_lookup_timeout: Duration::from_secs(5),
            pause_min: Duration::ZERO,
            pause_max: Duration::ZERO,
            progress_every: 0,
        }
    }

    fn test_session() -> Session {
        let config = SessionConfig {
            retry: RetryConfig::disabled(),
            ..SessionConfig::default()
        };
        Session::new(0, &config).unwrap()
    }

    fn fetcher_for(server: &MockServer, counters: &Arc<Counters>) -> ItemFetcher {
        ItemFetcher::new(
            EndpointConfig::with_base(&server.uri()),
            quick_fetch_config(),
            Arc::clone(counters),
        )
    }

    #[test]
    fn item_url_substitutes_every_placeholder() {
        assert_eq!(
            item_url("http://catalog/product/{id}?ref={id}", &id("p/42")),
            "http://catalog/product/42?ref=42"
        );
    }

    #[test]
    fn merge_attaches_related_and_overwrites_code() {
        let payload = merge(
            id("p/1"),
            object(json!({"id": 1, "upcCode": "old"})),
            CallOutcome::Fetched(json!({"recommendedProducts": []})),
            CallOutcome::Fetched(json!({"upcCode": "0123456789"})),
        );

        assert_eq!(payload.record["upcCode"], "0123456789");
        assert_eq!(payload.related(), Some(&json!({"recommendedProducts": []})));
    }

    #[test]
    fn merge_keeps_primary_code_when_lookup_is_empty() {
        let payload = merge(
            id("p/1"),
            object(json!({"id": 1, "upcCode": "primary"})),
            CallOutcome::Skipped(SkipReason::Timeout),
            CallOutcome::Fetched(json!({"upcCode": ""})),
        );

        assert_eq!(payload.record["upcCode"], "primary");
        assert!(payload.record.contains_key(RELATED_PRODUCTS_KEY));
        assert!(payload.related().is_none());
    }

    #[test]
    fn merge_ignores_skipped_code_lookup() {
        let payload = merge(
            id("p/1"),
            object(json!({"id": 1})),
            CallOutcome::Skipped(SkipReason::HttpStatus(500)),
            CallOutcome::Skipped(SkipReason::HttpStatus(404)),
        );

        assert!(!payload.record.contains_key(UPC_CODE_KEY));
        assert_eq!(payload.record[RELATED_PRODUCTS_KEY], Value::Null);
    }

    #[tokio::test]
    async fn fetch_merges_all_three_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1001, "displayName": "Omega 3"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recommendations/freqpurchasedtogether"))
            .and(query_param("productId", "1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"originProduct": {"name": "Omega 3"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ugc/api/product/1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upcCode": "733739016522"})))
            .expect(1)
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let fetcher = fetcher_for(&server, &counters);

        let payload = fetcher.fetch(&id("p/1001"), &test_session()).await.unwrap();

        assert_eq!(payload.item_id.as_str(), "1001");
        assert_eq!(payload.record["displayName"], "Omega 3");
        assert_eq!(payload.record["upcCode"], "733739016522");
        assert_eq!(payload.related().unwrap()["originProduct"]["name"], "Omega 3");
        assert_eq!(counters.snapshot().succeeded, 1);
        assert_eq!(counters.snapshot().failed, 0);
    }

    #[tokio::test]
    async fn primary_failure_skips_enrichment_and_counts_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/404"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recommendations/freqpurchasedtogether"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ugc/api/product/404"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let fetcher = fetcher_for(&server, &counters);

        assert!(fetcher.fetch(&id("p/404"), &test_session()).await.is_none());
        assert_eq!(counters.snapshot().failed, 1);
        assert_eq!(counters.snapshot().succeeded, 0);
    }

    #[tokio::test]
    async fn malformed_primary_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>challenge</html>"))
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let fetcher = fetcher_for(&server, &counters);

        assert!(fetcher.fetch(&id("p/5"), &test_session()).await.is_none());
        assert_eq!(counters.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn non_object_primary_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let fetcher = fetcher_for(&server, &counters);

        assert!(fetcher.fetch(&id("p/6"), &test_session()).await.is_none());
        assert_eq!(counters.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn primary_timeout_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 1}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let mut config = quick_fetch_config();
        config.primary_timeout = Duration::from_millis(100);
        let fetcher = ItemFetcher::new(
            EndpointConfig::with_base(&server.uri()),
            config,
            Arc::clone(&counters),
        );

        assert!(fetcher.fetch(&id("p/slow"), &test_session()).await.is_none());
        assert_eq!(counters.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn failed_enrichment_still_succeeds_with_null_related() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 77, "upcCode": "keep"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recommendations/freqpurchasedtogether"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ugc/api/product/77"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let fetcher = fetcher_for(&server, &counters);

        let payload = fetcher.fetch(&id("p/77"), &test_session()).await.unwrap();

        assert_eq!(payload.record[RELATED_PRODUCTS_KEY], Value::Null);
        assert!(payload.related().is_none());
        assert_eq!(payload.record["upcCode"], "keep");
        assert_eq!(counters.snapshot().succeeded, 1);
        assert_eq!(counters.snapshot().failed, 0);
    }

    #[tokio::test]
    async fn pause_runs_after_failed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let counters = Arc::new(Counters::new());
        let mut config = quick_fetch_config();
        config.pause_min = Duration::from_millis(120);
        config.pause_max = Duration::from_millis(150);
        let fetcher = ItemFetcher::new(
            EndpointConfig::with_base(&server.uri()),
            config,
            Arc::clone(&counters),
        );

        let start = std::time::Instant::now();
        assert!(fetcher.fetch(&id("p/3"), &test_session()).await.is_none());
        assert!(
            start.elapsed() >= Duration::from_millis(120),
            "pause should apply even on failure, took {:?}",
            start.elapsed()
        );
    }
}
