//! Dispatch scheduler
//!
//! The [`Dispatcher`] turns a list of item links into a stream of
//! [`Batch`]es. Identifiers are submitted in chunks of `chunk_size`; within a
//! chunk at most `concurrency` items are in flight, each on its own worker
//! slot and therefore its own session. Successful payloads are grouped in
//! completion order into batches of `batch_size`, and the trailing partial
//! batch is emitted once all chunks are done.
//!
//! Dispatch runs in a background task and hands batches over a bounded
//! channel, so a slow consumer applies backpressure instead of letting
//! batches pile up in memory. When the task ends, however it ends, every
//! session in the pool is closed.
//!
//! Each item runs under an outer `task_timeout`. A task that exceeds it is
//! aborted and counted as a failure; so is a task that panics. Neither stops
//! the run.

mod batching;
mod slots;


use crate::config::DispatchConfig;
use crate::counters::Counters;
use crate::error::{Error, Result};
use crate::fetcher::FetchItem;
use crate::session::SessionPool;
use crate::types::{Batch, ItemId, RawPayload};
use batching::BatchAccumulator;
use futures::FutureExt;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use slots::SlotRegistry;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// What the dispatcher did during one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Links received
    pub links: usize,
    /// Links dropped because no identifier could be extracted
    pub skipped: usize,
    /// Chunks fully processed
    pub chunks: usize,
    /// Batches emitted
    pub batches: usize,
    /// Payloads emitted across all batches
    pub fetched: usize,
    /// Whether dispatch stopped early on cancellation
    pub cancelled: bool,
}

/// Bounded-concurrency scheduler over a [`FetchItem`] implementation
pub struct Dispatcher<F> {
    fetcher: Arc<F>,
    sessions: Arc<SessionPool>,
    counters: Arc<Counters>,
    config: DispatchConfig,
    slots: Arc<SlotRegistry>,
    cancel: CancellationToken,
}

impl<F: FetchItem + 'static> Dispatcher<F> {
    /// Create a dispatcher
    ///
    /// `sessions` must have at least `config.concurrency` slots. `counters`
    /// is the same instance the fetcher reports to; the dispatcher adds the
    /// failures the fetcher cannot see (timeouts, panics, session errors).
    pub fn new(
        fetcher: Arc<F>,
        sessions: Arc<SessionPool>,
        counters: Arc<Counters>,
        config: DispatchConfig,
    ) -> Self {
        let slots = SlotRegistry::new(config.concurrency.max(1));
        Self {
            fetcher,
            sessions,
            counters,
            config,
            slots,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop submitting work when `token` is cancelled
    ///
    /// In-flight items still finish (bounded by `task_timeout`) and the
    /// partial batch is flushed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start dispatching `links` in the background
    pub fn spawn(self, links: Vec<String>) -> BatchStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.drive(links, tx)).catch_unwind().await;
            self.sessions.close_all().await;

            match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(error = %message, "dispatch task panicked");
                    Err(Error::Dispatch(format!("dispatch task panicked: {message}")))
                }
            }
        });

        BatchStream {
            batches: ReceiverStream::new(rx),
            task,
        }
    }

    async fn drive(&self, links: Vec<String>, tx: mpsc::Sender<Batch>) -> Result<DispatchReport> {
        let mut report = DispatchReport {
            links: links.len(),
            ..DispatchReport::default()
        };

        let mut ids = Vec::with_capacity(links.len());
        for link in &links {
            match ItemId::from_link(link) {
                Some(id) => ids.push(id),
                None => {
                    report.skipped += 1;
                    tracing::warn!(link = %link, "skipping link without item identifier");
                }
            }
        }
        drop(links);

        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = ids.len().div_ceil(chunk_size);
        let mut batches = BatchAccumulator::new(self.config.batch_size);

        tracing::info!(
            items = ids.len(),
            skipped = report.skipped,
            chunks = total_chunks,
            concurrency = self.config.concurrency,
            "dispatch started"
        );

        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            tracing::debug!(chunk = index + 1, total_chunks, items = chunk.len(), "processing chunk");

            let mut completed = stream::iter(chunk.iter().cloned())
                .map(|item_id| self.run_item(item_id))
                .buffer_unordered(self.config.concurrency.max(1));

            let mut unsubmitted = 0usize;
            while let Some(outcome) = completed.next().await {
                match outcome {
                    ItemOutcome::Fetched(payload) => {
                        report.fetched += 1;
                        if let Some(batch) = batches.push(payload) {
                            emit(&tx, batch, &mut report).await?;
                        }
                    }
                    ItemOutcome::Dropped => {}
                    ItemOutcome::NotSubmitted => unsubmitted += 1,
                }
            }
            drop(completed);

            // Cancelling while the last chunk drains still completes the run
            let remaining = index + 1 < total_chunks;
            if unsubmitted > 0 || (remaining && self.cancel.is_cancelled()) {
                report.cancelled = true;
                break;
            }
            report.chunks += 1;

            if self.config.reclaim_every_chunks > 0
                && report.chunks % self.config.reclaim_every_chunks == 0
            {
                batches.reclaim();
                tracing::debug!(chunks = report.chunks, pending = batches.pending(), "reclaimed buffers");
            }

            if index + 1 < total_chunks && !self.config.chunk_pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.chunk_pause) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        if let Some(batch) = batches.flush() {
            emit(&tx, batch, &mut report).await?;
        }

        let counts = self.counters.snapshot();
        tracing::info!(
            batches = report.batches,
            succeeded = counts.succeeded,
            failed = counts.failed,
            cancelled = report.cancelled,
            "dispatch finished"
        );

        Ok(report)
    }

    /// Fetch one item on a leased slot under the outer task timeout
    ///
    /// Items reached after cancellation are not submitted and count as
    /// neither success nor failure.
    async fn run_item(&self, item_id: ItemId) -> ItemOutcome {
        if self.cancel.is_cancelled() {
            return ItemOutcome::NotSubmitted;
        }
        let lease = match self.slots.lease().await {
            Ok(lease) => lease,
            Err(e) => {
                self.counters.record_failure();
                tracing::error!(item_id = %item_id, error = %e, "no worker slot for item");
                return ItemOutcome::Dropped;
            }
        };

        let fetcher = Arc::clone(&self.fetcher);
        let sessions = Arc::clone(&self.sessions);
        let task_id = item_id.clone();
        let mut handle: JoinHandle<Result<Option<RawPayload>>> = tokio::spawn(async move {
            let session = sessions.acquire(lease.slot()).await?;
            let payload = fetcher.fetch(&task_id, &session).await;
            drop(lease);
            Ok(payload)
        });

        let payload = match tokio::time::timeout(self.config.task_timeout, &mut handle).await {
            Ok(joined) => self.settle(&item_id, joined),
            Err(_) => {
                handle.abort();
                match handle.await {
                    // Finished right at the deadline
                    Ok(Ok(payload)) => payload,
                    Err(e) if e.is_cancelled() => {
                        self.counters.record_failure();
                        tracing::warn!(
                            item_id = %item_id,
                            timeout_secs = self.config.task_timeout.as_secs_f64(),
                            "item task timed out"
                        );
                        None
                    }
                    other => self.settle(&item_id, other),
                }
            }
        };

        match payload {
            Some(payload) => ItemOutcome::Fetched(payload),
            None => ItemOutcome::Dropped,
        }
    }

    fn settle(
        &self,
        item_id: &ItemId,
        joined: std::result::Result<Result<Option<RawPayload>>, JoinError>,
    ) -> Option<RawPayload> {
        match joined {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                self.counters.record_failure();
                tracing::warn!(item_id = %item_id, error = %e, "item task could not start");
                None
            }
            Err(e) => {
                self.counters.record_failure();
                if e.is_panic() {
                    let message = panic_message(e.into_panic().as_ref());
                    tracing::error!(item_id = %item_id, error = %message, "item task panicked");
                } else {
                    tracing::error!(item_id = %item_id, error = %e, "item task failed");
                }
                None
            }
        }
    }
}

/// How one submitted identifier ended
enum ItemOutcome {
    Fetched(RawPayload),
    /// Failed, timed out or panicked; already counted
    Dropped,
    /// Reached after cancellation, never fetched
    NotSubmitted,
}

async fn emit(tx: &mpsc::Sender<Batch>, batch: Batch, report: &mut DispatchReport) -> Result<()> {
    let sequence = batch.sequence();
    let size = batch.len();
    tx.send(batch)
        .await
        .map_err(|_| Error::Dispatch("batch consumer dropped".to_string()))?;
    report.batches += 1;
    tracing::debug!(sequence, size, "batch emitted");
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Batches produced by a running [`Dispatcher`]
///
/// Yields batches in emission order. Call [`finish`](Self::finish) after the
/// stream ends to collect the [`DispatchReport`].
pub struct BatchStream {
    batches: ReceiverStream<Batch>,
    task: JoinHandle<Result<DispatchReport>>,
}

impl BatchStream {
    /// Wait for the dispatch task and return its report
    ///
    /// Batches not yet received are discarded, which ends dispatch with
    /// [`Error::Dispatch`] if it was still producing.
    pub async fn finish(self) -> Result<DispatchReport> {
        let BatchStream { batches, task } = self;
        drop(batches);
        task.await
            .map_err(|e| Error::Dispatch(format!("dispatch task failed: {e}")))?
    }
}

impl Stream for BatchStream {
    type Item = Batch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Batch>> {
        Pin::new(&mut self.batches).poll_next(cx)
    }
}
