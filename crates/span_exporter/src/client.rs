//! Remote trace API clients.
//!
//! [`TraceClient`] is the uploader seam: the exporter hands it one
//! [`BatchWriteSpansRequest`] per batch and logs whatever error comes back.
//! The exporter itself never retries; wrap a client in [`RetryingClient`] if
//! retry at the transport layer is wanted.

use crate::wire::BatchWriteSpansRequest;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

/// Error types for upload operations
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ExportError> },
    /// Upload timed out
    #[error("upload timed out")]
    Timeout,
}

/// Client for the remote trace ingestion API.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// [`TraceClientBoxed`], which every `TraceClient` implements.
pub trait TraceClient: Send + Sync {
    /// Writes every span in `request` with a single remote call.
    fn batch_write_spans(
        &self,
        request: BatchWriteSpansRequest,
    ) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Checks the backend is reachable. Called once while building the exporter.
    fn connect(&self) -> impl Future<Output = Result<(), ExportError>> + Send {
        async { Ok(()) }
    }

    /// Returns the client name for debugging.
    fn name(&self) -> &str;
}

type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Object-safe version of [`TraceClient`].
pub trait TraceClientBoxed: Send + Sync {
    fn batch_write_spans_boxed(&self, request: BatchWriteSpansRequest) -> BoxedResult<'_>;

    fn connect_boxed(&self) -> BoxedResult<'_>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any TraceClient can be used as TraceClientBoxed
impl<T: TraceClient> TraceClientBoxed for T {
    fn batch_write_spans_boxed(&self, request: BatchWriteSpansRequest) -> BoxedResult<'_> {
        Box::pin(self.batch_write_spans(request))
    }

    fn connect_boxed(&self) -> BoxedResult<'_> {
        Box::pin(self.connect())
    }

    fn name(&self) -> &str {
        TraceClient::name(self)
    }
}

/// Prints uploaded spans to stdout (for local debugging)
pub struct StdoutClient {
    verbose: bool,
}

impl StdoutClient {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TraceClient for StdoutClient {
    async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        if self.verbose {
            println!("=== {}: {} spans ===", request.name, request.spans.len());
            for span in &request.spans {
                println!(
                    "Span: {} display_name={} events={} status={:?}",
                    span.name,
                    span.display_name.value,
                    span.time_events.len(),
                    span.status
                );
            }
            println!("=== Upload complete ===\n");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Appends each request to a file as one line of JSON.
pub struct JsonFileClient {
    file_path: String,
    /// Serializes appends from concurrent uploads
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileClient {
    pub fn new(file_path: String) -> Self {
        Self {
            file_path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

impl TraceClient for JsonFileClient {
    async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }

    async fn connect(&self) -> Result<(), ExportError> {
        // Fail at build time rather than on the first batch if the target is unwritable.
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .map(|_| ())
            .map_err(|e| ExportError::Transport(e.to_string()))
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Discards every request (for benchmarking)
#[derive(Default)]
pub struct NullClient;

impl NullClient {
    pub fn new() -> Self {
        Self
    }
}

impl TraceClient for NullClient {
    async fn batch_write_spans(&self, _request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the given attempt (0-indexed; attempt 0 never waits).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// A client wrapper that retries failed uploads with exponential backoff.
///
/// ```ignore
/// let client = RetryingClient::new(MyHttpClient::new(), RetryConfig::default());
/// let exporter = Exporter::new(options, Arc::new(client)).await?;
/// ```
pub struct RetryingClient<C: TraceClient> {
    inner: C,
    config: RetryConfig,
    total_retries: AtomicU64,
    recovered_uploads: AtomicU64,
}

impl<C: TraceClient> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_uploads: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Total number of retry attempts made.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Uploads that succeeded after at least one retry.
    pub fn recovered_uploads(&self) -> u64 {
        self.recovered_uploads.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: TraceClient> TraceClient for RetryingClient<C> {
    async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        let max_attempts = self.config.max_retries + 1;
        let mut last = ExportError::Timeout;

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug_assert!(delay <= self.config.max_delay);
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }

            match self.inner.batch_write_spans(request.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_uploads.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        attempt,
                        client = TraceClient::name(&self.inner),
                        error = %e,
                        "upload attempt failed"
                    );
                    last = e;
                }
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    async fn connect(&self) -> Result<(), ExportError> {
        self.inner.connect().await
    }

    fn name(&self) -> &str {
        TraceClient::name(&self.inner)
    }
}

/// Records every request it receives (for tests)
#[cfg(test)]
#[derive(Default)]
pub struct TestClient {
    requests: std::sync::Mutex<Vec<BatchWriteSpansRequest>>,
}

#[cfg(test)]
impl TestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploaded_spans(&self) -> usize {
        self.requests.lock().unwrap().iter().map(|r| r.len()).sum()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(|r| r.len()).collect()
    }
}

#[cfg(test)]
impl TraceClient for TestClient {
    async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}
