//! # catalog-harvester
//!
//! Concurrent fetch-and-persist pipeline for remote product catalogs.
//!
//! ## Design Philosophy
//!
//! catalog-harvester is designed to be:
//! - **Bounded** - A fixed worker pool, a bounded batch channel and chunked
//!   submission keep memory flat on catalogs of any size
//! - **Failure tolerant** - One bad item never stops the run; enrichment
//!   calls are best effort and transient HTTP errors are retried
//! - **Incremental** - Every batch is persisted as soon as it completes
//! - **Sensible defaults** - An empty configuration harvests the public catalog
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_harvester::{Config, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.dispatch.concurrency = 20;
//!     config.output.directory = "harvest".into();
//!
//!     let harvester = Harvester::new(config)?;
//!     let summary = harvester.run().await?;
//!     println!("{} items stored in {} batches", summary.persisted, summary.batches);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Success/failure counters
pub mod counters;
/// Dispatch scheduler (worker slots, chunking, batching)
pub mod dispatch;
/// Error types
pub mod error;
/// Per-item fetch-and-merge protocol
pub mod fetcher;
/// Pipeline orchestration
pub mod harvester;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-worker HTTP sessions
pub mod session;
/// Record sinks (JSON array, XML document)
pub mod sink;
/// Sitemap identifier source
pub mod sitemap;
/// Raw payload to product record mapping
pub mod transform;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{
    Config, DispatchConfig, EndpointConfig, FetchConfig, OutputConfig, RetryConfig, SessionConfig,
};
pub use counters::{CounterSnapshot, Counters};
pub use dispatch::{BatchStream, DispatchReport, Dispatcher};
pub use error::{Error, Result};
pub use fetcher::{FetchItem, ItemFetcher};
pub use harvester::Harvester;
pub use session::{Session, SessionPool};
pub use sink::{JsonArraySink, RecordSink, SinkSet, XmlDocumentSink};
pub use sitemap::SitemapSource;
pub use transform::{ProductRecord, RecordTransformer};
pub use types::{Batch, CallOutcome, HarvestSummary, ItemId, RawPayload, SkipReason};

/// Run a harvest, stopping gracefully on a termination signal.
///
/// On a signal the harvester's cancellation token is cancelled: no new items
/// are submitted, in-flight items finish and every batch fetched so far is
/// persisted before the summary is returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use catalog_harvester::{Config, Harvester, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(Config::default())?;
///     let summary = run_until_signal(&harvester).await?;
///     println!("cancelled: {}", summary.cancelled);
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(harvester: &Harvester) -> Result<HarvestSummary> {
    let cancel = harvester.cancellation_token();
    let run = harvester.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::info!("stopping: waiting for in-flight items and persisting partial batch");
            cancel.cancel();
            run.await
        }
    }
}

/// Resolve on SIGTERM or SIGINT
///
/// Falls back to `ctrl_c` when the unix handlers cannot be installed, which
/// happens in some sandboxed environments.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut terminate, mut interrupt) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(terminate), Ok(interrupt)) => (terminate, interrupt),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal handlers unavailable, falling back to ctrl_c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "cannot listen for ctrl_c");
                }
                return;
            }
        };

    tokio::select! {
        _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "shutdown requested"),
        _ = interrupt.recv() => tracing::info!(signal = "SIGINT", "shutdown requested"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "shutdown requested"),
        Err(e) => tracing::error!(error = %e, "cannot listen for ctrl_c"),
    }
}
