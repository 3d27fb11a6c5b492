//! Pipeline orchestration
//!
//! [`Harvester`] wires the stages together for one run:
//!
//! ```text
//! sitemap links -> Dispatcher -> batches -> RecordTransformer -> SinkSet
//! ```
//!
//! Batches are transformed and persisted as soon as the dispatcher emits
//! them, so an interrupted run keeps every batch stored before the
//! interruption.

use crate::config::Config;
use crate::counters::Counters;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::fetcher::ItemFetcher;
use crate::session::SessionPool;
use crate::sink::SinkSet;
use crate::sitemap::SitemapSource;
use crate::transform::RecordTransformer;
use crate::types::{HarvestSummary, ItemId};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// One configured fetch-and-persist pipeline
pub struct Harvester {
    config: Config,
    sinks: SinkSet,
    transformer: RecordTransformer,
    cancel: CancellationToken,
}

impl Harvester {
    /// Validate `config` and prepare the configured output sinks
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let sinks = SinkSet::from_config(&config.output)?;
        Ok(Self {
            config,
            sinks,
            transformer: RecordTransformer::new()?,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the configured sinks
    pub fn with_sinks(mut self, sinks: SinkSet) -> Self {
        self.sinks = sinks;
        self
    }

    /// Token that stops the run when cancelled
    ///
    /// Cancelling stops new items from being submitted. Items already in
    /// flight finish, and everything fetched so far is persisted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The configuration this harvester runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load links from the configured sitemaps and harvest them
    pub async fn run(&self) -> Result<HarvestSummary> {
        let started = Instant::now();
        let source = SitemapSource::new(self.config.endpoints.sitemap_urls.clone(), &self.config.session)?;
        let links = source.links().await;
        tracing::info!(links = links.len(), "identifier list loaded");

        let mut summary = self.run_links(links).await?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Harvest an explicit list of item links
    pub async fn run_links(&self, links: Vec<String>) -> Result<HarvestSummary> {
        let started = Instant::now();
        if links.is_empty() {
            tracing::warn!("no links to process");
            return Ok(HarvestSummary {
                elapsed: started.elapsed(),
                ..HarvestSummary::default()
            });
        }

        let fetchable = links
            .iter()
            .filter(|link| ItemId::from_link(link).is_some())
            .count();
        let counters = Arc::new(Counters::new());
        let sessions = Arc::new(SessionPool::new(
            self.config.session.clone(),
            self.config.dispatch.concurrency,
        ));
        let fetcher = Arc::new(ItemFetcher::new(
            self.config.endpoints.clone(),
            self.config.fetch.clone(),
            Arc::clone(&counters),
        ));

        let mut batches = Dispatcher::new(
            fetcher,
            Arc::clone(&sessions),
            Arc::clone(&counters),
            self.config.dispatch.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .spawn(links);

        let mut persisted = 0;
        while let Some(batch) = batches.next().await {
            let records = self.transformer.transform_batch(&batch);
            let stored = self.sinks.append(&records).await;
            persisted += records.len();

            let counts = counters.snapshot();
            tracing::info!(
                batch = batch.sequence(),
                records = records.len(),
                sinks = stored,
                persisted,
                succeeded = counts.succeeded,
                failed = counts.failed,
                progress = %format!("{:.1}%", progress_percent(counts.completed(), fetchable)),
                "batch persisted"
            );
        }

        let report = batches.finish().await;
        sessions.close_all().await;
        let report = report?;

        let counts = counters.snapshot();
        let summary = HarvestSummary {
            links: report.links,
            skipped: report.skipped,
            succeeded: counts.succeeded,
            failed: counts.failed,
            batches: report.batches,
            persisted,
            cancelled: report.cancelled,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            links = summary.links,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            batches = summary.batches,
            persisted = summary.persisted,
            cancelled = summary.cancelled,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "harvest finished"
        );

        Ok(summary)
    }
}

/// Share of fetchable items already settled, in percent
fn progress_percent(completed: u64, fetchable: usize) -> f64 {
    if fetchable == 0 {
        return 100.0;
    }
    (completed as f64 / fetchable as f64 * 100.0).min(100.0)
}
