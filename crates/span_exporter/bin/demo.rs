//! # Span Exporter Demo
//!
//! Drives the batching exporter end to end against a simulated backend.
//!
//! ## Phases
//!
//! 1. **Steady load**: several producer tasks export spans with realistic
//!    attributes; batches leave on the count or delay threshold and upload
//!    concurrently through a `RetryingClient`.
//! 2. **Overload**: a backend that takes a second per batch and a small buffer
//!    ceiling. Producers never block; excess spans are dropped and the
//!    overflow diagnostic fires once, followed by a single summary.
//!
//! ## Running
//!
//! ```bash
//! # Quick mode
//! cargo run -p span_exporter --features demo --bin demo --release -- --quick
//!
//! # Print every uploaded batch
//! cargo run -p span_exporter --features demo --bin demo --release -- --stdout
//!
//! # More detail from the exporter itself
//! RUST_LOG=span_exporter=debug cargo run -p span_exporter --features demo --bin demo
//! ```

use rand::Rng;
use span_exporter::{
    AttributeValue, BatchWriteSpansRequest, BundlerLimits, ExportError, ExportMetrics,
    ExportOutcome, Exporter, ExporterOptions, MessageEventKind, RetryConfig, RetryingClient,
    Span, SpanKind, SpanStatus, StdoutClient, TraceClient, TraceClientBoxed, QUIET_WINDOW,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// SIMULATED BACKEND
// =============================================================================

/// Backend that sleeps for `latency` and fails a fraction of calls.
struct SimulatedBackend {
    failure_rate: f64,
    latency: Duration,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl SimulatedBackend {
    fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate,
            latency,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl TraceClient for SimulatedBackend {
    async fn batch_write_spans(&self, request: BatchWriteSpansRequest) -> Result<(), ExportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(ExportError::Transport(format!(
                "simulated backend failure (batch of {} spans)",
                request.len()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// =============================================================================
// SPAN GENERATION
// =============================================================================

const OPERATIONS: [(&str, SpanKind); 5] = [
    ("GET /api/users", SpanKind::Server),
    ("SELECT users", SpanKind::Client),
    ("cache.get", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
    ("render_profile", SpanKind::Internal),
];

fn generate_span(producer_id: usize, seq: u64) -> Span {
    let mut rng = rand::thread_rng();
    let (name, kind) = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let parent = if rng.gen_bool(0.8) { rng.gen() } else { 0 };

    let mut span = Span::new(
        rng.gen(),
        (producer_id as u64) << 48 | seq,
        parent,
        name.to_string(),
        kind,
    );
    span.set_attribute(
        "service.name".to_string(),
        AttributeValue::String("demo-service".to_string()),
    );
    span.set_attribute(
        "service.instance.id".to_string(),
        AttributeValue::Int(producer_id as i64),
    );
    if kind == SpanKind::Server {
        span.set_attribute("http.method".to_string(), AttributeValue::String("GET".into()));
    }
    if kind == SpanKind::Client && rng.gen_bool(0.3) {
        span.add_message_event(MessageEventKind::Sent, seq, 512, 128);
        span.add_message_event(MessageEventKind::Received, seq, 2048, 700);
    }
    if rng.gen_bool(0.05) {
        span.add_annotation("cache miss".to_string(), HashMap::new());
    }

    if rng.gen_bool(0.1) {
        span.set_attribute("error".to_string(), AttributeValue::Bool(true));
        span.finish(SpanStatus::Error {
            code: 13,
            message: "internal error".to_string(),
        });
    } else {
        span.finish(SpanStatus::Ok);
    }
    span
}

async fn run_producers(exporter: &Arc<Exporter>, producers: usize, spans_each: u64, pace: Duration) {
    let mut tasks = Vec::with_capacity(producers);
    for producer_id in 0..producers {
        let exporter = Arc::clone(exporter);
        tasks.push(tokio::spawn(async move {
            let mut dropped = 0u64;
            for seq in 0..spans_each {
                if exporter.export(generate_span(producer_id, seq)) == ExportOutcome::Dropped {
                    dropped += 1;
                }
                tokio::time::sleep(pace).await;
            }
            dropped
        }));
    }
    for (producer_id, task) in tasks.into_iter().enumerate() {
        match task.await {
            Ok(dropped) => tracing::debug!(producer_id, dropped, "producer finished"),
            Err(e) => tracing::error!(producer_id, error = %e, "producer task failed"),
        }
    }
}

fn print_metrics(metrics: &ExportMetrics, elapsed: Duration) {
    println!("   Spans exported:     {}", metrics.spans_exported());
    println!("   Batches exported:   {}", metrics.batches_exported());
    println!("   Failed uploads:     {}", metrics.export_errors());
    println!("   Spans lost:         {}", metrics.spans_lost());
    println!("   Spans dropped:      {}", metrics.spans_dropped());
    println!("   Oversized uploads:  {}", metrics.oversized_uploads());
    println!(
        "   Throughput:         {:.0} spans/sec",
        metrics.spans_exported() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.contains(&"--quick".to_string());
    let stdout = args.contains(&"--stdout".to_string());

    let (producers, spans_each) = if quick { (4, 50) } else { (8, 250) };

    // =========================================================================
    // PHASE 1: Steady load
    // =========================================================================

    println!("Phase 1: steady load ({} producers x {} spans)\n", producers, spans_each);

    let client: Arc<dyn TraceClientBoxed> = if stdout {
        Arc::new(StdoutClient::new(true))
    } else {
        Arc::new(RetryingClient::new(
            SimulatedBackend::new(0.1, Duration::from_millis(20)),
            RetryConfig::default().with_initial_delay(Duration::from_millis(10)),
        ))
    };
    let options = ExporterOptions::new("demo-project")
        .with_count_threshold(50)
        .with_delay_threshold(Duration::from_millis(500));
    let exporter = Arc::new(Exporter::new(options, client).await?);

    let start = Instant::now();
    run_producers(&exporter, producers, spans_each, Duration::from_millis(1)).await;
    exporter.flush().await;
    print_metrics(exporter.metrics(), start.elapsed());
    println!();

    // =========================================================================
    // PHASE 2: Overload
    // =========================================================================

    println!("Phase 2: slow backend, buffer ceiling of 200 spans\n");

    let slow = Arc::new(SimulatedBackend::new(0.0, Duration::from_secs(1)));
    let limits = BundlerLimits::from_count_threshold(20)
        .with_delay_threshold(Duration::from_millis(200))
        .with_buffered_byte_limit(200);
    let exporter = Arc::new(
        Exporter::builder(ExporterOptions::new("demo-project"))
            .limits(limits)
            .build(slow.clone())
            .await?,
    );

    let start = Instant::now();
    run_producers(&exporter, producers, spans_each, Duration::from_millis(2)).await;
    println!(
        "   Producers finished in {:?} without blocking; {} spans buffered",
        start.elapsed(),
        exporter.buffered_weight()
    );

    // Let the quiet window pass so the drop summary is logged
    tokio::time::sleep(QUIET_WINDOW + Duration::from_millis(200)).await;
    exporter.shutdown().await;

    print_metrics(exporter.metrics(), start.elapsed());
    println!(
        "   Backend calls:      {} ({} failed)",
        slow.calls.load(Ordering::Relaxed),
        slow.failures.load(Ordering::Relaxed)
    );

    Ok(())
}
