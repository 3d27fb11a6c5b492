//! Core types for catalog-harvester

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Key under which the related-items fragment is attached to a payload
pub const RELATED_PRODUCTS_KEY: &str = "frequently_purchased_together";

/// Field of the primary record overwritten by the code lookup
pub const UPC_CODE_KEY: &str = "upcCode";

/// Identifier of one catalog item
///
/// Derived from the final path segment of an item URL. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Extract the identifier from an item link
    ///
    /// Returns `None` when the final path segment is empty or whitespace, which
    /// is how links such as `"p/"` are skipped before any request is made.
    ///
    /// # Examples
    ///
    /// ```
    /// use catalog_harvester::types::ItemId;
    ///
    /// let id = ItemId::from_link(" https://www.example.com/pr/fish-oil/1001 ").unwrap();
    /// assert_eq!(id.as_str(), "1001");
    /// assert!(ItemId::from_link("p/").is_none());
    /// ```
    pub fn from_link(link: &str) -> Option<Self> {
        let segment = link.trim().rsplit('/').next()?.trim();
        if segment.is_empty() {
            None
        } else {
            Some(Self(segment.to_string()))
        }
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a best-effort call contributed nothing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The server answered with a status other than 200
    HttpStatus(u16),
    /// The call did not finish within its timeout
    Timeout,
    /// Connection or transport failure
    Network(String),
    /// The body was not usable JSON
    InvalidBody(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::HttpStatus(status) => write!(f, "HTTP {status}"),
            SkipReason::Timeout => write!(f, "timed out"),
            SkipReason::Network(msg) => write!(f, "network: {msg}"),
            SkipReason::InvalidBody(msg) => write!(f, "invalid body: {msg}"),
        }
    }
}

impl From<&crate::error::Error> for SkipReason {
    fn from(error: &crate::error::Error) -> Self {
        use crate::error::Error;

        if error.is_timeout() {
            return SkipReason::Timeout;
        }
        match error {
            Error::HttpStatus { status, .. } => SkipReason::HttpStatus(*status),
            Error::InvalidPayload { reason, .. } => SkipReason::InvalidBody(reason.clone()),
            Error::Serialization(e) => SkipReason::InvalidBody(e.to_string()),
            Error::Network(e) if e.is_decode() => SkipReason::InvalidBody(e.to_string()),
            other => SkipReason::Network(other.to_string()),
        }
    }
}

/// Result of one best-effort enrichment call
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome<T> {
    /// The call succeeded
    Fetched(T),
    /// The call failed and its contribution is omitted
    Skipped(SkipReason),
}

impl<T> CallOutcome<T> {
    /// The fetched value, if any
    pub fn fetched(self) -> Option<T> {
        match self {
            CallOutcome::Fetched(value) => Some(value),
            CallOutcome::Skipped(_) => None,
        }
    }
}

/// Merged result of the three calls made for one item
///
/// `record` is the primary record as returned by the catalog, with the
/// related-items fragment attached under [`RELATED_PRODUCTS_KEY`] (null when
/// that call was skipped) and [`UPC_CODE_KEY`] overwritten when the code
/// lookup returned a code.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawPayload {
    /// Identifier the payload was fetched for
    pub item_id: ItemId,
    /// The enriched primary record
    pub record: Map<String, Value>,
}

impl RawPayload {
    /// The related-items fragment, `None` when the enrichment call was skipped
    pub fn related(&self) -> Option<&Value> {
        self.record
            .get(RELATED_PRODUCTS_KEY)
            .filter(|value| !value.is_null())
    }

    /// Look up a field of the enriched record
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.record.get(key)
    }
}

/// Completion-ordered group of payloads handed to the sink stage
///
/// Built by the dispatcher and read-only afterwards.
#[derive(Clone, Debug)]
pub struct Batch {
    sequence: usize,
    items: Vec<RawPayload>,
}

impl Batch {
    pub(crate) fn new(sequence: usize, items: Vec<RawPayload>) -> Self {
        Self { sequence, items }
    }

    /// 1-based position of this batch in the run
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Number of payloads in the batch
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no payloads
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Payloads in completion order
    pub fn items(&self) -> &[RawPayload] {
        &self.items
    }

    /// Consume the batch, yielding its payloads
    pub fn into_items(self) -> Vec<RawPayload> {
        self.items
    }
}

/// Final report of a harvest run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    /// Links provided by the identifier source
    pub links: usize,
    /// Links skipped because no identifier could be extracted
    pub skipped: usize,
    /// Items fetched successfully
    pub succeeded: u64,
    /// Items that failed or timed out
    pub failed: u64,
    /// Batches emitted by the dispatcher
    pub batches: usize,
    /// Records handed to the sinks
    pub persisted: usize,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
    /// Wall-clock duration of the run
    #[serde(with = "duration_secs_f64")]
    pub elapsed: Duration,
}

mod duration_secs_f64 {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_id_takes_final_path_segment() {
        assert_eq!(
            ItemId::from_link("https://www.iherb.com/pr/now-foods-omega-3/1001")
                .unwrap()
                .as_str(),
            "1001"
        );
        assert_eq!(ItemId::from_link("p/1002").unwrap().as_str(), "1002");
        assert_eq!(ItemId::from_link("1003").unwrap().as_str(), "1003");
        assert_eq!(ItemId::from_link("  p/1004\n").unwrap().as_str(), "1004");
    }

    #[test]
    fn item_id_rejects_empty_segments() {
        assert!(ItemId::from_link("p/").is_none());
        assert!(ItemId::from_link("").is_none());
        assert!(ItemId::from_link("   ").is_none());
        assert!(ItemId::from_link("https://www.iherb.com/pr/ /").is_none());
        assert!(ItemId::from_link("p/   ").is_none());
    }

    #[test]
    fn related_treats_null_as_absent() {
        let mut record = Map::new();
        record.insert("id".into(), json!(1));
        record.insert(RELATED_PRODUCTS_KEY.into(), Value::Null);

        let payload = RawPayload {
            item_id: ItemId::from_link("p/1").unwrap(),
            record,
        };

        assert!(payload.get(RELATED_PRODUCTS_KEY).is_some());
        assert!(payload.related().is_none());
    }

    #[test]
    fn call_outcome_accessors() {
        let fetched: CallOutcome<u32> = CallOutcome::Fetched(7);
        assert_eq!(fetched.fetched(), Some(7));

        let skipped: CallOutcome<u32> = CallOutcome::Skipped(SkipReason::Timeout);
        assert_eq!(skipped.fetched(), None);
    }

    #[test]
    fn skip_reason_from_http_error() {
        let err = crate::error::Error::HttpStatus {
            url: "http://catalog/recommendations".into(),
            status: 500,
        };
        assert_eq!(SkipReason::from(&err), SkipReason::HttpStatus(500));
        assert_eq!(SkipReason::from(&err).to_string(), "HTTP 500");
    }

    #[test]
    fn summary_serializes_elapsed_as_seconds() {
        let summary = HarvestSummary {
            links: 3,
            succeeded: 2,
            elapsed: Duration::from_millis(1500),
            ..HarvestSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["succeeded"], 2);
    }
}
