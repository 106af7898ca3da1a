//! Batching Trace Span Exporter
//!
//! Buffers finished tracing spans and uploads them to a trace backend in
//! batches. A batch leaves when it reaches a span count, a weight threshold or
//! an age, whichever comes first. Several uploads may be in flight at once.
//!
//! When the backend falls behind, the exporter does not block the
//! instrumented code: once pending plus in-flight spans reach a ceiling, new
//! spans are dropped and reported through a rate-limited diagnostic that emits
//! at most one message per quiet window.
//!
//! Clients use native async traits (no `#[async_trait]` macro), with a boxed
//! twin trait for dynamic dispatch.

pub mod bundler;
pub mod client;
pub mod config;
pub mod exporter;
pub mod overflow;
pub mod span;
pub mod timer;
pub mod wire;

// Re-export main types
pub use bundler::{BundleError, Bundler};
pub use client::{
    ExportError, JsonFileClient, NullClient, RetryConfig, RetryingClient, StdoutClient, TraceClient,
    TraceClientBoxed,
};
pub use config::{BundlerLimits, ExporterOptions, DEFAULT_COUNT_THRESHOLD, DEFAULT_DELAY_THRESHOLD};
pub use exporter::{ExportMetrics, ExportOutcome, Exporter, ExporterBuildError, ExporterBuilder};
pub use overflow::{OverflowLogger, OverflowReport, ReportSink, QUIET_WINDOW};
pub use span::{
    Annotation, AttributeValue, MessageEvent, MessageEventKind, Span, SpanBatch, SpanKind,
    SpanStatus,
};
pub use timer::Timer;
pub use wire::BatchWriteSpansRequest;
