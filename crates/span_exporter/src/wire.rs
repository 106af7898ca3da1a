//! Backend wire representation of spans.
//!
//! Translation is a pure function of a [`Span`] and the project identifier.
//! The structures derive `Serialize` so clients can encode them however the
//! transport requires (the bundled [`JsonFileClient`](crate::client::JsonFileClient)
//! writes them as JSON).

use crate::span::{AttributeValue, MessageEventKind, Span, SpanKind, SpanStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Maximum number of attributes kept per span or time event.
pub const MAX_ATTRIBUTES: usize = 32;
/// Maximum display name length in bytes.
pub const MAX_DISPLAY_NAME_BYTES: usize = 128;
/// Maximum attribute string value length in bytes.
pub const MAX_ATTRIBUTE_VALUE_BYTES: usize = 256;
/// Maximum annotation description length in bytes.
pub const MAX_ANNOTATION_BYTES: usize = 256;

/// One upload call: every span of a batch under a single project.
#[derive(Debug, Clone, Serialize)]
pub struct BatchWriteSpansRequest {
    /// `projects/<project_id>`
    pub name: String,
    pub spans: Vec<WireSpan>,
}

impl BatchWriteSpansRequest {
    /// Translates `spans` for `project_id` into one request.
    pub fn from_spans<'a, I>(project_id: &str, spans: I) -> Self
    where
        I: IntoIterator<Item = &'a Span>,
    {
        Self {
            name: format!("projects/{}", project_id),
            spans: spans
                .into_iter()
                .map(|span| span_to_wire(span, project_id))
                .collect(),
        }
    }

    /// Number of spans carried by the request.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// A string cut to a byte limit, with the number of bytes removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruncatableString {
    pub value: String,
    pub truncated_byte_count: usize,
}

impl TruncatableString {
    fn new(s: &str, limit: usize) -> Self {
        if s.len() <= limit {
            return Self {
                value: s.to_string(),
                truncated_byte_count: 0,
            };
        }
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            value: s[..end].to_string(),
            truncated_byte_count: s.len() - end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireAttributeValue {
    String(TruncatableString),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireAttributes {
    /// Sorted by key so output is deterministic.
    pub attribute_map: BTreeMap<String, WireAttributeValue>,
    pub dropped_attributes_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    fn from_unix_nanos(nanos: u64) -> Self {
        Self {
            seconds: (nanos / 1_000_000_000) as i64,
            nanos: (nanos % 1_000_000_000) as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEventValue {
    Annotation {
        description: TruncatableString,
        attributes: WireAttributes,
    },
    MessageEvent {
        sent: bool,
        id: u64,
        uncompressed_size_bytes: u64,
        compressed_size_bytes: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeEvent {
    pub time: Timestamp,
    pub value: TimeEventValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireStatus {
    pub code: i32,
    pub message: String,
}

/// Backend representation of a single span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSpan {
    /// `projects/{p}/traces/{trace}/spans/{span}`
    pub name: String,
    pub span_id: String,
    /// Empty for root spans.
    pub parent_span_id: String,
    pub display_name: TruncatableString,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub attributes: WireAttributes,
    pub time_events: Vec<TimeEvent>,
    /// Program counters, innermost first.
    pub stack_frames: Vec<String>,
    pub status: Option<WireStatus>,
}

/// Maps one span to the backend representation.
///
/// Total for any span: oversized names and values are truncated and excess
/// attributes are counted as dropped rather than rejected.
pub fn span_to_wire(span: &Span, project_id: &str) -> WireSpan {
    let trace_id = format!("{:032x}", span.trace_id);
    let span_id = format!("{:016x}", span.span_id);

    let mut attributes = convert_attributes(span.attributes.iter());
    attributes.attribute_map.insert(
        "span.kind".to_string(),
        WireAttributeValue::String(TruncatableString::new(
            kind_label(span.kind),
            MAX_ATTRIBUTE_VALUE_BYTES,
        )),
    );

    let annotations = span.annotations.iter().map(|a| TimeEvent {
        time: Timestamp::from_unix_nanos(a.time),
        value: TimeEventValue::Annotation {
            description: TruncatableString::new(&a.message, MAX_ANNOTATION_BYTES),
            attributes: convert_attributes(a.attributes.iter()),
        },
    });
    let message_events = span.message_events.iter().map(|e| TimeEvent {
        time: Timestamp::from_unix_nanos(e.time),
        value: TimeEventValue::MessageEvent {
            sent: e.kind == MessageEventKind::Sent,
            id: e.message_id,
            uncompressed_size_bytes: e.uncompressed_size,
            compressed_size_bytes: e.compressed_size,
        },
    });
    let mut time_events: Vec<TimeEvent> = annotations.chain(message_events).collect();
    time_events.sort_by_key(|e| (e.time.seconds, e.time.nanos));

    WireSpan {
        name: format!(
            "projects/{}/traces/{}/spans/{}",
            project_id, trace_id, span_id
        ),
        span_id,
        parent_span_id: if span.parent_span_id == 0 {
            String::new()
        } else {
            format!("{:016x}", span.parent_span_id)
        },
        display_name: TruncatableString::new(&span.name, MAX_DISPLAY_NAME_BYTES),
        start_time: Timestamp::from_unix_nanos(span.start_time),
        end_time: Timestamp::from_unix_nanos(span.end_time),
        attributes,
        time_events,
        stack_frames: span
            .stack_trace
            .iter()
            .map(|pc| format!("{:#x}", pc))
            .collect(),
        status: match &span.status {
            SpanStatus::Unset => None,
            SpanStatus::Ok => Some(WireStatus {
                code: 0,
                message: String::new(),
            }),
            SpanStatus::Error { code, message } => Some(WireStatus {
                code: *code,
                message: message.clone(),
            }),
        },
    }
}

fn convert_attributes<'a, I>(attrs: I) -> WireAttributes
where
    I: Iterator<Item = (&'a String, &'a AttributeValue)>,
{
    // Sort first so the kept subset does not depend on hash order.
    let mut sorted: Vec<_> = attrs.collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let total = sorted.len();
    let attribute_map: BTreeMap<_, _> = sorted
        .into_iter()
        .take(MAX_ATTRIBUTES)
        .map(|(k, v)| (k.clone(), convert_value(v)))
        .collect();
    WireAttributes {
        dropped_attributes_count: total - attribute_map.len(),
        attribute_map,
    }
}

fn convert_value(value: &AttributeValue) -> WireAttributeValue {
    match value {
        AttributeValue::String(s) => {
            WireAttributeValue::String(TruncatableString::new(s, MAX_ATTRIBUTE_VALUE_BYTES))
        }
        AttributeValue::Int(i) => WireAttributeValue::Int(*i),
        AttributeValue::Bool(b) => WireAttributeValue::Bool(*b),
        // The backend has no float or list type.
        AttributeValue::Float(f) => {
            WireAttributeValue::String(TruncatableString::new(&f.to_string(), MAX_ATTRIBUTE_VALUE_BYTES))
        }
        AttributeValue::Array(items) => WireAttributeValue::String(TruncatableString::new(
            &items.join(","),
            MAX_ATTRIBUTE_VALUE_BYTES,
        )),
    }
}

fn kind_label(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Internal => "internal",
        SpanKind::Server => "server",
        SpanKind::Client => "client",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
    }
}
