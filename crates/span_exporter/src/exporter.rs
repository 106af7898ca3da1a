//! Batching exporter
//!
//! [`Exporter::export`] never waits on the network. It charges the span to the
//! [`Bundler`] under a short-lived lock and returns; batches that become ready
//! are uploaded on their own tokio tasks, so several uploads can be in flight
//! while new spans keep arriving.
//!
//! ```rust,ignore
//! let exporter = Exporter::new(
//!     ExporterOptions::new("my-project"),
//!     Arc::new(StdoutClient::new(true)),
//! )
//! .await?;
//!
//! exporter.export(span);
//!
//! // Before exiting, push out whatever is still buffered
//! exporter.shutdown().await;
//! ```
//!
//! When uploads fall behind and the buffered weight would pass its ceiling,
//! new spans are dropped and reported through the [`OverflowLogger`] rather
//! than blocking producers or growing memory without bound.

use crate::bundler::{Added, BundleError, Bundler, Rejected};
use crate::client::{ExportError, TraceClientBoxed};
use crate::config::{BundlerLimits, ExporterOptions};
use crate::overflow::{tracing_sink, OverflowLogger, ReportSink, QUIET_WINDOW};
use crate::span::{Span, SpanBatch};
use crate::timer::{ScheduledCallback, Timer};
use crate::wire::BatchWriteSpansRequest;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// Errors building an [`Exporter`]. No exporter is returned on error.
#[derive(Debug, Error)]
pub enum ExporterBuildError {
    #[error("project id is required")]
    MissingProjectId,
    #[error("no tokio runtime available to run uploads")]
    NoRuntime,
    #[error("couldn't initialize client: {0}")]
    ClientInit(#[source] ExportError),
}

/// What happened to a span passed to [`Exporter::export`].
///
/// Informational only: none of these are errors for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Buffered in the pending batch
    Accepted,
    /// Too heavy for a batch; uploading on its own
    UploadingAlone,
    /// Buffer full; the span was discarded
    Dropped,
    /// The exporter has been shut down; the span was discarded
    Rejected,
}

/// Thread-safe export counters.
///
/// All loads and stores are `Relaxed`: these are statistics, nothing
/// synchronizes on them.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Spans delivered to the client successfully
    pub spans_exported: AtomicU64,
    /// Upload calls that succeeded
    pub batches_exported: AtomicU64,
    /// Upload calls that failed
    pub export_errors: AtomicU64,
    /// Spans in failed upload calls
    pub spans_lost: AtomicU64,
    /// Spans discarded because the buffer was full
    pub spans_dropped: AtomicU64,
    /// Spans uploaded alone because they exceeded the batch limit
    pub oversized_uploads: AtomicU64,
    /// Upload calls currently running
    pub inflight_uploads: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    pub fn spans_lost(&self) -> u64 {
        self.spans_lost.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn oversized_uploads(&self) -> u64 {
        self.oversized_uploads.load(Ordering::Relaxed)
    }

    pub fn inflight_uploads(&self) -> u64 {
        self.inflight_uploads.load(Ordering::Relaxed)
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, span_count: u64) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
        self.spans_lost.fetch_add(span_count, Ordering::Relaxed);
    }
}

/// Builder for [`Exporter`] with the less common knobs.
pub struct ExporterBuilder {
    options: ExporterOptions,
    limits: Option<BundlerLimits>,
    overflow_sink: Option<ReportSink>,
    quiet_window: Duration,
    runtime: Option<Handle>,
}

impl ExporterBuilder {
    /// Overrides the limits derived from the options.
    pub fn limits(mut self, limits: BundlerLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Sends overflow reports somewhere other than `tracing`.
    pub fn overflow_sink(mut self, sink: ReportSink) -> Self {
        self.overflow_sink = Some(sink);
        self
    }

    /// Changes the overflow quiet window (default 5s).
    pub fn quiet_window(mut self, window: Duration) -> Self {
        self.quiet_window = window;
        self
    }

    /// Runs uploads and timers on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Checks the client can reach the backend, then builds the exporter.
    pub async fn build(
        self,
        client: Arc<dyn TraceClientBoxed>,
    ) -> Result<Exporter, ExporterBuildError> {
        self.validate()?;
        client
            .connect_boxed()
            .await
            .map_err(ExporterBuildError::ClientInit)?;
        self.build_unconnected(client)
    }

    /// Builds the exporter without probing the backend.
    pub fn build_unconnected(
        self,
        client: Arc<dyn TraceClientBoxed>,
    ) -> Result<Exporter, ExporterBuildError> {
        self.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ExporterBuildError::NoRuntime)?,
        };
        let timer = Timer::new(runtime);
        let limits = self
            .limits
            .unwrap_or_else(|| self.options.bundler_limits());
        let overflow = OverflowLogger::with_sink(
            timer.clone(),
            self.quiet_window,
            self.overflow_sink.unwrap_or_else(tracing_sink),
        );

        tracing::debug!(
            project_id = %self.options.project_id,
            client = client.name(),
            count_threshold = limits.count_threshold,
            buffered_limit = limits.buffered_byte_limit,
            "span exporter ready"
        );

        Ok(Exporter {
            inner: Arc::new(Inner {
                project_id: self.options.project_id,
                client,
                delay_threshold: limits.delay_threshold,
                state: Mutex::new(State {
                    bundler: Bundler::new(limits),
                    inflight: BTreeSet::new(),
                    next_upload: 0,
                    delay: None,
                }),
                upload_done: Notify::new(),
                overflow,
                metrics: ExportMetrics::default(),
                timer,
            }),
        })
    }

    fn validate(&self) -> Result<(), ExporterBuildError> {
        if self.options.project_id.is_empty() {
            return Err(ExporterBuildError::MissingProjectId);
        }
        Ok(())
    }
}

/// Buffers spans and uploads them in batches.
pub struct Exporter {
    inner: Arc<Inner>,
}

impl Exporter {
    /// Creates an exporter for `options.project_id` that uploads through `client`.
    ///
    /// Fails if the client cannot reach the backend.
    pub async fn new(
        options: ExporterOptions,
        client: Arc<dyn TraceClientBoxed>,
    ) -> Result<Self, ExporterBuildError> {
        Self::builder(options).build(client).await
    }

    pub fn builder(options: ExporterOptions) -> ExporterBuilder {
        ExporterBuilder {
            options,
            limits: None,
            overflow_sink: None,
            quiet_window: QUIET_WINDOW,
            runtime: None,
        }
    }

    /// Queues a span for upload. Never blocks on the network.
    pub fn export(&self, span: Span) -> ExportOutcome {
        let weight = span.weight();
        let mut state = self.inner.lock_state();
        let result = state.bundler.add(span, weight);

        match result {
            Ok(Added { ready, opened }) => {
                let uploads: Vec<Upload> = ready
                    .into_iter()
                    .map(|batch| state.register_batch(batch))
                    .collect();
                state.retire_delay();
                // A batch detached in the same call needs no timer.
                if let Some(generation) = opened.filter(|g| *g == state.bundler.generation()) {
                    self.inner.arm_delay(&mut state, generation);
                }
                drop(state);

                for upload in uploads {
                    self.inner.spawn_upload(upload);
                }
                ExportOutcome::Accepted
            }
            Err(Rejected {
                span,
                reason: BundleError::OversizedItem,
            }) => {
                // Not charged to the buffer: it never sits in a batch.
                let upload = state.register(SpanBatch::with_spans(vec![span]), 0);
                drop(state);

                tracing::debug!(weight, "span exceeds batch limit, uploading alone");
                self.inner
                    .metrics
                    .oversized_uploads
                    .fetch_add(1, Ordering::Relaxed);
                self.inner.spawn_upload(upload);
                ExportOutcome::UploadingAlone
            }
            Err(Rejected {
                reason: BundleError::Overflow,
                ..
            }) => {
                drop(state);
                self.inner
                    .metrics
                    .spans_dropped
                    .fetch_add(1, Ordering::Relaxed);
                self.inner.overflow.record_drop();
                ExportOutcome::Dropped
            }
            Err(Rejected { reason, .. }) => {
                drop(state);
                tracing::warn!(error = %reason, "failed to export span");
                ExportOutcome::Rejected
            }
        }
    }

    /// Uploads the pending batch now and waits until it and every batch
    /// handed off before it have finished uploading.
    pub async fn flush(&self) {
        let target = self.inner.force_pending();
        self.inner.wait_for_uploads_before(target).await;
    }

    /// Stops accepting spans, then flushes.
    ///
    /// Spans exported after this call are rejected.
    pub async fn shutdown(&self) {
        self.inner.lock_state().bundler.close();
        self.flush().await;
    }

    pub fn metrics(&self) -> &ExportMetrics {
        &self.inner.metrics
    }

    pub fn overflow_logger(&self) -> &OverflowLogger {
        &self.inner.overflow
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Spans waiting in the pending batch
    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().bundler.pending_len()
    }

    /// Weight of pending plus in-flight spans
    pub fn buffered_weight(&self) -> usize {
        self.inner.lock_state().bundler.buffered_weight()
    }
}

/// A batch on its way to the client.
struct Upload {
    id: u64,
    batch: SpanBatch,
    /// Weight to return to the bundler when the upload finishes
    charged: usize,
}

struct State {
    bundler: Bundler,
    /// Ids of uploads that have not finished
    inflight: BTreeSet<u64>,
    next_upload: u64,
    /// Delay timer of the pending batch, by generation
    delay: Option<(u64, ScheduledCallback)>,
}

impl State {
    /// Assigns the next upload id. Ids are handed out in detach order, which
    /// is what lets `flush` wait for "everything before me".
    fn register(&mut self, batch: SpanBatch, charged: usize) -> Upload {
        let id = self.next_upload;
        self.next_upload += 1;
        self.inflight.insert(id);
        Upload { id, batch, charged }
    }

    fn register_batch(&mut self, batch: SpanBatch) -> Upload {
        let weight = batch.weight;
        self.register(batch, weight)
    }

    /// Cancels the delay timer once its batch has left the bundler.
    fn retire_delay(&mut self) {
        let current = self.bundler.generation();
        if let Some((generation, callback)) = self.delay.take() {
            if generation == current {
                self.delay = Some((generation, callback));
            } else {
                callback.cancel();
            }
        }
    }
}

struct Inner {
    project_id: String,
    client: Arc<dyn TraceClientBoxed>,
    delay_threshold: Duration,
    state: Mutex<State>,
    upload_done: Notify,
    overflow: OverflowLogger,
    metrics: ExportMetrics,
    timer: Timer,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_delay(self: &Arc<Self>, state: &mut State, generation: u64) {
        let inner = Arc::clone(self);
        let callback = self
            .timer
            .schedule(self.delay_threshold, move || inner.flush_generation(generation));
        state.delay = Some((generation, callback));
    }

    /// Delay timer callback: uploads the batch it was armed for, if that batch
    /// is still pending.
    fn flush_generation(self: &Arc<Self>, generation: u64) {
        let upload = {
            let mut state = self.lock_state();
            match state.bundler.take_generation(generation) {
                Some(batch) => {
                    state.delay = None;
                    Some(state.register_batch(batch))
                }
                None => None,
            }
        };
        if let Some(upload) = upload {
            tracing::debug!(spans = upload.batch.len(), "delay threshold reached");
            self.spawn_upload(upload);
        }
    }

    /// Detaches and uploads the pending batch. Returns the first upload id
    /// that was *not* handed off by the time of the call.
    fn force_pending(self: &Arc<Self>) -> u64 {
        let (target, upload) = {
            let mut state = self.lock_state();
            let upload = match state.bundler.take_batch() {
                Some(batch) => Some(state.register_batch(batch)),
                None => None,
            };
            state.retire_delay();
            (state.next_upload, upload)
        };
        if let Some(upload) = upload {
            self.spawn_upload(upload);
        }
        target
    }

    async fn wait_for_uploads_before(&self, target: u64) {
        loop {
            // Registered before the check so a completion in between is not missed.
            let notified = self.upload_done.notified();
            let busy = self.lock_state().inflight.range(..target).next().is_some();
            if !busy {
                return;
            }
            notified.await;
        }
    }

    /// Must be called without the state lock held.
    fn spawn_upload(self: &Arc<Self>, upload: Upload) {
        let Upload { id, batch, charged } = upload;
        self.metrics.inflight_uploads.fetch_add(1, Ordering::Relaxed);
        // Owned by the task, so the bookkeeping is finished even if the client
        // panics or the runtime drops the task before polling it.
        let done = UploadGuard {
            inner: Arc::clone(self),
            id,
            charged,
        };
        let inner = Arc::clone(self);
        self.timer.runtime().spawn(inner.upload(batch, done));
    }

    async fn upload(self: Arc<Self>, batch: SpanBatch, _done: UploadGuard) {
        let span_count = batch.len() as u64;
        let request = BatchWriteSpansRequest::from_spans(&self.project_id, &batch.spans);
        drop(batch);

        match self.client.batch_write_spans_boxed(request).await {
            Ok(()) => {
                self.metrics.record_success(span_count);
                tracing::debug!(spans = span_count, "uploaded batch");
            }
            Err(e) => {
                self.metrics.record_error(span_count);
                tracing::warn!(
                    spans = span_count,
                    error = %e,
                    "failed to upload {} spans",
                    span_count
                );
            }
        }
    }

    fn finish_upload(&self, id: u64, charged: usize) {
        {
            let mut state = self.lock_state();
            state.inflight.remove(&id);
            state.bundler.release(charged);
        }
        self.metrics.inflight_uploads.fetch_sub(1, Ordering::Relaxed);
        self.upload_done.notify_waiters();
    }
}

struct UploadGuard {
    inner: Arc<Inner>,
    id: u64,
    charged: usize,
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.inner.finish_upload(self.id, self.charged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TestClient, TraceClient};
    use crate::overflow::{recording_sink, OverflowReport};
    use crate::span::SpanKind;
    use std::sync::atomic::AtomicUsize;

    fn span(i: u64) -> Span {
        Span::new(1, i, 0, format!("op-{}", i), SpanKind::Internal)
    }

    fn options(count: usize, delay: Duration) -> ExporterOptions {
        ExporterOptions::new("test-project")
            .with_count_threshold(count)
            .with_delay_threshold(delay)
    }

    async fn settle() {
        // Lets spawned upload tasks run; with paused time this costs nothing.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Client that always fails.
    struct BrokenClient {
        calls: AtomicUsize,
    }

    impl TraceClient for BrokenClient {
        async fn batch_write_spans(&self, _request: BatchWriteSpansRequest) -> Result<(), ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::Transport("backend unavailable".into()))
        }

        async fn connect(&self) -> Result<(), ExportError> {
            Err(ExportError::Transport("connection refused".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// Client that takes a while and tracks how many calls overlap.
    #[derive(Default)]
    struct SlowClient {
        current: AtomicUsize,
        max_concurrent: AtomicUsize,
        uploaded: AtomicUsize,
    }

    impl TraceClient for SlowClient {
        async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.uploaded.fetch_add(request.len(), Ordering::SeqCst);
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_threshold_uploads_without_delay() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        for i in 0..50 {
            assert_eq!(exporter.export(span(i)), ExportOutcome::Accepted);
        }
        settle().await;

        assert_eq!(client.batch_sizes(), vec![50]);
        assert_eq!(exporter.metrics().batches_exported(), 1);
        assert_eq!(exporter.buffered_weight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_threshold_uploads_partial_batch() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        for i in 0..3 {
            exporter.export(span(i));
        }
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(client.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.batch_sizes(), vec![3]);
        assert_eq!(exporter.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_timer_does_not_cut_newer_batch_short() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        exporter.export(span(0));
        exporter.flush().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Opens a new batch; the first timer fires 500ms from now
        exporter.export(span(1));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(client.batch_sizes(), vec![1]);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(client.batch_sizes(), vec![1, 1]);
    }

    fn armed_generation(exporter: &Exporter) -> Option<u64> {
        exporter.inner.lock_state().delay.as_ref().map(|(g, _)| *g)
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_detach_cancels_delay_timer() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        exporter.export(span(0));
        assert_eq!(armed_generation(&exporter), Some(0));
        exporter.flush().await;
        assert_eq!(armed_generation(&exporter), None);

        // Filled by count before the delay elapses
        for i in 1..51 {
            exporter.export(span(i));
            if i < 50 {
                assert_eq!(armed_generation(&exporter), Some(1));
            }
        }
        assert_eq!(armed_generation(&exporter), None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.batch_sizes(), vec![1, 50]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_detached_on_open_arms_no_timer() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(1, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        exporter.export(span(0));
        assert_eq!(armed_generation(&exporter), None);
        settle().await;
        assert_eq!(client.batch_sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fire_clears_armed_timer() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(2)), client.clone())
            .await
            .unwrap();

        exporter.export(span(0));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(client.batch_sizes(), vec![1]);
        assert_eq!(armed_generation(&exporter), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_forces_pending_batch() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(60)), client.clone())
            .await
            .unwrap();

        for i in 0..7 {
            exporter.export(span(i));
        }
        exporter.flush().await;

        assert_eq!(client.batch_sizes(), vec![7]);
        assert_eq!(exporter.metrics().spans_exported(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_inflight_uploads() {
        let client = Arc::new(SlowClient::default());
        let exporter = Exporter::new(options(10, Duration::from_secs(60)), client.clone())
            .await
            .unwrap();

        // Two full batches already in flight plus a partial one
        for i in 0..25 {
            exporter.export(span(i));
        }
        exporter.flush().await;

        assert_eq!(client.uploaded.load(Ordering::SeqCst), 25);
        assert_eq!(exporter.metrics().inflight_uploads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_run_concurrently() {
        let client = Arc::new(SlowClient::default());
        let exporter = Exporter::new(options(10, Duration::from_secs(60)), client.clone())
            .await
            .unwrap();

        for i in 0..30 {
            exporter.export(span(i));
        }
        exporter.flush().await;

        assert_eq!(client.max_concurrent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_span_uploaded_alone() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::builder(options(2, Duration::from_secs(60)))
            .build(client.clone())
            .await
            .unwrap();

        exporter.export(span(0));

        let mut huge = span(1);
        huge.set_stack_trace(vec![0; 2000]); // weight 2001 > 2 * 1000
        assert_eq!(exporter.export(huge), ExportOutcome::UploadingAlone);
        settle().await;

        assert_eq!(client.batch_sizes(), vec![1]);
        assert_eq!(exporter.pending_len(), 1);
        assert_eq!(exporter.buffered_weight(), 1);
        assert_eq!(exporter.metrics().oversized_uploads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_drops_and_reports_once_per_window() {
        let (sink, reports) = recording_sink();
        let client = Arc::new(TestClient::new());
        let limits = BundlerLimits::from_count_threshold(100)
            .with_delay_threshold(Duration::from_secs(60))
            .with_byte_limit(10)
            .with_buffered_byte_limit(10);
        let exporter = Exporter::builder(ExporterOptions::new("p"))
            .limits(limits)
            .overflow_sink(sink)
            .build(client.clone())
            .await
            .unwrap();

        let outcomes: Vec<_> = (0..15).map(|i| exporter.export(span(i))).collect();
        let dropped = outcomes
            .iter()
            .filter(|o| **o == ExportOutcome::Dropped)
            .count();

        assert_eq!(dropped, 5);
        assert_eq!(exporter.metrics().spans_dropped(), 5);
        assert_eq!(*reports.lock().unwrap(), vec![OverflowReport::BufferFull]);

        tokio::time::sleep(QUIET_WINDOW + Duration::from_millis(100)).await;
        assert_eq!(
            *reports.lock().unwrap(),
            vec![
                OverflowReport::BufferFull,
                OverflowReport::Dropped {
                    count: 4,
                    episode_total: 5
                },
            ]
        );
        assert_eq!(
            reports.lock().unwrap()[1].to_string(),
            "failed to upload 4 spans: buffer full (5 since overflow began)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_is_logged_not_retried() {
        let client = Arc::new(BrokenClient {
            calls: AtomicUsize::new(0),
        });
        let exporter = Exporter::builder(options(5, Duration::from_secs(60)))
            .build_unconnected(client.clone())
            .unwrap();

        for i in 0..5 {
            exporter.export(span(i));
        }
        exporter.flush().await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exporter.metrics().export_errors(), 1);
        assert_eq!(exporter.metrics().spans_lost(), 5);
        // Failed uploads still give their weight back
        assert_eq!(exporter.buffered_weight(), 0);
    }

    #[tokio::test]
    async fn test_build_fails_when_client_cannot_connect() {
        let client = Arc::new(BrokenClient {
            calls: AtomicUsize::new(0),
        });
        let result = Exporter::new(ExporterOptions::new("p"), client).await;
        assert!(matches!(result, Err(ExporterBuildError::ClientInit(_))));
    }

    #[tokio::test]
    async fn test_build_requires_project_id() {
        let result = Exporter::new(ExporterOptions::new(""), Arc::new(TestClient::new())).await;
        assert!(matches!(result, Err(ExporterBuildError::MissingProjectId)));
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = Exporter::builder(ExporterOptions::new("p"))
            .build_unconnected(Arc::new(TestClient::new()));
        assert!(matches!(result, Err(ExporterBuildError::NoRuntime)));
    }

    #[test]
    fn test_upload_dropped_by_stopped_runtime_releases_buffer() {
        let background = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let exporter = Exporter::builder(options(5, Duration::from_secs(60)))
            .runtime(background.handle().clone())
            .build_unconnected(Arc::new(TestClient::new()))
            .unwrap();
        drop(background);

        // The full batch is handed to a runtime that drops it unpolled
        for i in 0..5 {
            exporter.export(span(i));
        }
        assert_eq!(exporter.buffered_weight(), 0);
        assert_eq!(exporter.metrics().inflight_uploads(), 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let flushed = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), exporter.flush()).await
        });
        assert!(flushed.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_rejects_later_spans() {
        let client = Arc::new(TestClient::new());
        let exporter = Exporter::new(options(50, Duration::from_secs(60)), client.clone())
            .await
            .unwrap();

        exporter.export(span(0));
        exporter.export(span(1));
        exporter.shutdown().await;

        assert_eq!(client.batch_sizes(), vec![2]);
        assert_eq!(exporter.export(span(2)), ExportOutcome::Rejected);
        exporter.flush().await;
        assert_eq!(client.uploaded_spans(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_export_from_plain_threads() {
        let client = Arc::new(TestClient::new());
        let exporter = Arc::new(
            Exporter::new(options(16, Duration::from_secs(60)), client.clone())
                .await
                .unwrap(),
        );

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let exporter = Arc::clone(&exporter);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        exporter.export(span(t * 1000 + i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        exporter.flush().await;
        assert_eq!(client.uploaded_spans(), 400);
        assert_eq!(exporter.metrics().spans_dropped(), 0);
    }
}
