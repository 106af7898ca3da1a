use std::collections::HashMap;
use std::time::SystemTime;

/// A completed distributed tracing span, as handed over by the tracing library.
///
/// The exporter treats spans as read-only: it weighs them, groups them into
/// batches and translates them for the backend, but never modifies them.
#[derive(Debug, Clone)]
pub struct Span {
    /// Unique trace identifier (128-bit)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds)
    pub end_time: u64,
    /// Operation name
    pub name: String,
    /// Span attributes (boxed to keep Span size manageable)
    pub attributes: Box<HashMap<String, AttributeValue>>,
    /// Timestamped log messages recorded while the span was open
    pub annotations: Vec<Annotation>,
    /// Messages sent or received while the span was open
    pub message_events: Vec<MessageEvent>,
    /// Program counters captured when the span was started
    pub stack_trace: Vec<u64>,
    /// Span status
    pub status: SpanStatus,
    /// Span kind
    pub kind: SpanKind,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

/// A timestamped message attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Unix nanoseconds
    pub time: u64,
    pub message: String,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Direction of a [`MessageEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEventKind {
    Sent,
    Received,
}

/// A message sent or received within a span (typically an RPC payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Unix nanoseconds
    pub time: u64,
    pub kind: MessageEventKind,
    pub message_id: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

/// Span execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    /// Span completed successfully
    Ok,
    /// Span completed with error, carrying a canonical status code
    Error { code: i32, message: String },
    /// Span status unknown
    Unset,
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Internal operation span
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

/// Batch of spans handed to the upload step as one unit.
#[derive(Debug, Clone)]
pub struct SpanBatch {
    /// All spans in this batch, in arrival order
    pub spans: Vec<Span>,
    /// Sum of [`Span::weight`] over `spans`
    pub weight: usize,
}

fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl Span {
    /// Creates a new span with the given parameters
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: String,
        kind: SpanKind,
    ) -> Self {
        let now = unix_nanos_now();

        Self {
            trace_id,
            span_id,
            parent_span_id,
            start_time: now,
            end_time: now,
            name,
            attributes: Box::new(HashMap::new()),
            annotations: Vec::new(),
            message_events: Vec::new(),
            stack_trace: Vec::new(),
            status: SpanStatus::Unset,
            kind,
        }
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = unix_nanos_now();
        self.status = status;
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: String, value: AttributeValue) {
        self.attributes.insert(key, value);
    }

    /// Records an annotation stamped with the current time
    pub fn add_annotation(&mut self, message: String, attributes: HashMap<String, AttributeValue>) {
        self.annotations.push(Annotation {
            time: unix_nanos_now(),
            message,
            attributes,
        });
    }

    /// Records a message event stamped with the current time
    pub fn add_message_event(
        &mut self,
        kind: MessageEventKind,
        message_id: u64,
        uncompressed_size: u64,
        compressed_size: u64,
    ) {
        self.message_events.push(MessageEvent {
            time: unix_nanos_now(),
            kind,
            message_id,
            uncompressed_size,
            compressed_size,
        });
    }

    /// Sets the captured stack trace
    pub fn set_stack_trace(&mut self, frames: Vec<u64>) {
        self.stack_trace = frames;
    }

    /// Approximate size of the span used for batching decisions.
    ///
    /// One unit for the span itself plus one per attribute, annotation,
    /// message event and stack frame. Not a byte count.
    pub fn weight(&self) -> usize {
        1 + self.attributes.len()
            + self.annotations.len()
            + self.message_events.len()
            + self.stack_trace.len()
    }
}

impl SpanBatch {
    /// Creates a new empty span batch
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            weight: 0,
        }
    }

    /// Creates a batch with the given spans
    pub fn with_spans(spans: Vec<Span>) -> Self {
        let weight = spans.iter().map(Span::weight).sum();
        Self {
            spans,
            weight,
        }
    }

    /// Adds a span to the batch
    pub fn add(&mut self, span: Span) {
        let weight = span.weight();
        self.push_weighted(span, weight);
    }

    /// Adds a span whose weight the caller already computed
    pub(crate) fn push_weighted(&mut self, span: Span, weight: usize) {
        self.weight += weight;
        self.spans.push(span);
    }

    /// Returns the number of spans in the batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_of_bare_span_is_one() {
        let span = Span::new(1, 1, 0, "op".to_string(), SpanKind::Internal);
        assert_eq!(span.weight(), 1);
    }

    #[test]
    fn test_weight_counts_every_component() {
        let mut span = Span::new(1, 1, 0, "op".to_string(), SpanKind::Server);
        span.set_attribute("http.method".into(), AttributeValue::String("GET".into()));
        span.set_attribute("http.status".into(), AttributeValue::Int(200));
        span.add_annotation("cache miss".into(), HashMap::new());
        span.add_message_event(MessageEventKind::Sent, 1, 128, 64);
        span.add_message_event(MessageEventKind::Received, 1, 256, 100);
        span.set_stack_trace(vec![0x1000, 0x2000, 0x3000]);

        // 1 + 2 attributes + 1 annotation + 2 events + 3 frames
        assert_eq!(span.weight(), 9);
    }

    #[test]
    fn test_batch_tracks_weight() {
        let mut heavy = Span::new(1, 2, 0, "heavy".to_string(), SpanKind::Client);
        heavy.set_stack_trace(vec![1, 2, 3, 4]);

        let mut batch = SpanBatch::new();
        batch.add(Span::new(1, 1, 0, "light".to_string(), SpanKind::Client));
        batch.add(heavy.clone());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.weight, 6);

        let rebuilt = SpanBatch::with_spans(vec![heavy]);
        assert_eq!(rebuilt.weight, 5);
    }
}
