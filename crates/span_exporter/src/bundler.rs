//! Bundler - Pure Batching State Machine
//!
//! Decides when spans leave the pending batch, and keeps the weight
//! accounting that lets the exporter shed load when uploads fall behind.
//! Like the rest of the batching layer it has no concurrency machinery:
//! the [`Exporter`](crate::Exporter) wraps it in a mutex, arms the delay timer
//! and runs the uploads.
//!
//! # Weight accounting
//!
//! Every accepted span is charged its weight to the *buffered* total. The
//! charge stays while the span waits in the pending batch and while its batch
//! is being uploaded, and is returned through [`Bundler::release`] once the
//! upload attempt completes. A span that would push the buffered total over
//! [`BundlerLimits::buffered_byte_limit`] is refused with
//! [`BundleError::Overflow`].
//!
//! # Generations
//!
//! Each pending batch has a generation number, bumped every time a batch is
//! detached. A delay timer armed for one generation uses
//! [`Bundler::take_generation`] so it can never flush a younger batch early.

use crate::config::BundlerLimits;
use crate::span::{Span, SpanBatch};
use thiserror::Error;
use tokio::time::Instant;

/// Reasons a span is refused by [`Bundler::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BundleError {
    /// The span alone weighs more than a whole batch may.
    #[error("item exceeds the per-batch size limit")]
    OversizedItem,
    /// Accepting the span would exceed the buffered-weight ceiling.
    #[error("buffered spans exceed the configured limit")]
    Overflow,
    /// The bundler no longer accepts spans.
    #[error("bundler is closed")]
    Closed,
}

/// A refused span, handed back to the caller together with the reason.
#[derive(Debug)]
pub struct Rejected {
    pub span: Span,
    pub reason: BundleError,
}

/// Result of a successful [`Bundler::add`].
#[derive(Debug, Default)]
pub struct Added {
    /// Batches detached by this call, oldest first. At most two: the previous
    /// batch when the new span would overfill it, and the new batch when it
    /// reached a threshold.
    pub ready: Vec<SpanBatch>,
    /// Set when the span opened a new pending batch; the caller should arm the
    /// delay timer for this generation.
    pub opened: Option<u64>,
}

/// Groups spans into batches bounded by count, weight and age.
#[derive(Debug)]
pub struct Bundler {
    limits: BundlerLimits,
    pending: SpanBatch,
    /// When the oldest pending span arrived
    first_added: Option<Instant>,
    /// Weight of pending spans plus detached batches not yet released
    buffered: usize,
    generation: u64,
    closed: bool,
}

impl Bundler {
    pub fn new(limits: BundlerLimits) -> Self {
        Self {
            limits,
            pending: SpanBatch::new(),
            first_added: None,
            buffered: 0,
            generation: 0,
            closed: false,
        }
    }

    /// Adds a span of the given weight to the pending batch.
    ///
    /// Never blocks. On refusal the span is returned inside [`Rejected`].
    pub fn add(&mut self, span: Span, weight: usize) -> Result<Added, Rejected> {
        if self.closed {
            return Err(Rejected {
                span,
                reason: BundleError::Closed,
            });
        }
        if weight > self.limits.byte_limit {
            return Err(Rejected {
                span,
                reason: BundleError::OversizedItem,
            });
        }
        if self.buffered + weight > self.limits.buffered_byte_limit {
            return Err(Rejected {
                span,
                reason: BundleError::Overflow,
            });
        }

        let mut added = Added::default();
        if !self.pending.is_empty() && self.pending.weight + weight > self.limits.byte_limit {
            added.ready.extend(self.detach());
        }
        if self.pending.is_empty() {
            self.first_added = Some(Instant::now());
            added.opened = Some(self.generation);
        }

        self.pending.push_weighted(span, weight);
        self.buffered += weight;

        if self.pending.len() >= self.limits.count_threshold
            || self.pending.weight >= self.limits.byte_threshold
        {
            added.ready.extend(self.detach());
        }
        Ok(added)
    }

    /// Detaches the pending batch regardless of thresholds.
    ///
    /// Returns `None` if no spans are pending. The batch's weight stays
    /// charged until [`release`](Self::release) is called.
    pub fn take_batch(&mut self) -> Option<SpanBatch> {
        self.detach()
    }

    /// Detaches the pending batch only if it is still the given generation.
    pub fn take_generation(&mut self, generation: u64) -> Option<SpanBatch> {
        if generation != self.generation {
            return None;
        }
        self.detach()
    }

    /// Returns weight charged for an upload that has finished.
    pub fn release(&mut self, weight: usize) {
        debug_assert!(
            weight <= self.buffered,
            "released {} but only {} buffered",
            weight,
            self.buffered
        );
        self.buffered = self.buffered.saturating_sub(weight);
    }

    /// Checks if the pending batch has been waiting for the delay threshold
    pub fn should_flush(&self) -> bool {
        self.first_added
            .is_some_and(|t| t.elapsed() >= self.limits.delay_threshold)
    }

    /// Refuses all further spans. Pending spans can still be taken.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of spans in the pending batch
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Weight of the pending batch
    pub fn pending_weight(&self) -> usize {
        self.pending.weight
    }

    /// Weight of pending plus in-flight spans
    pub fn buffered_weight(&self) -> usize {
        self.buffered
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn limits(&self) -> &BundlerLimits {
        &self.limits
    }

    fn detach(&mut self) -> Option<SpanBatch> {
        if self.pending.is_empty() {
            return None;
        }
        self.generation += 1;
        self.first_added = None;
        Some(std::mem::take(&mut self.pending))
    }
}
