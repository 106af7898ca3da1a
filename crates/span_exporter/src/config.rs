//! Exporter configuration.

use std::time::Duration;

/// Default maximum time a batch waits before it is uploaded.
pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_secs(2);
/// Default maximum number of spans per batch.
pub const DEFAULT_COUNT_THRESHOLD: usize = 50;

/// Options recognized by [`Exporter::new`](crate::Exporter::new).
///
/// Only the project identifier is required; zero thresholds fall back to the
/// defaults.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Backend project (tenant) that receives the spans.
    pub project_id: String,

    /// Maximum time to wait before uploading a batch.
    ///
    /// Default: 2s
    pub delay_threshold: Duration,

    /// Maximum number of spans to upload in one batch.
    ///
    /// Default: 50
    pub count_threshold: usize,
}

impl ExporterOptions {
    /// Creates options for `project_id` with default thresholds.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            count_threshold: DEFAULT_COUNT_THRESHOLD,
        }
    }

    /// Sets the delay threshold.
    pub fn with_delay_threshold(mut self, delay: Duration) -> Self {
        self.delay_threshold = delay;
        self
    }

    /// Sets the count threshold.
    pub fn with_count_threshold(mut self, count: usize) -> Self {
        self.count_threshold = count;
        self
    }

    /// Batching limits derived from these options.
    pub fn bundler_limits(&self) -> BundlerLimits {
        let delay = if self.delay_threshold.is_zero() {
            DEFAULT_DELAY_THRESHOLD
        } else {
            self.delay_threshold
        };
        let count = if self.count_threshold == 0 {
            DEFAULT_COUNT_THRESHOLD
        } else {
            self.count_threshold
        };
        BundlerLimits::from_count_threshold(count).with_delay_threshold(delay)
    }
}

/// Thresholds that drive the [`Bundler`](crate::bundler::Bundler).
///
/// Sizes are span weights (see [`Span::weight`](crate::Span::weight)), not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerLimits {
    /// Upload a batch once its first span is this old.
    pub delay_threshold: Duration,
    /// Upload a batch once it holds this many spans.
    pub count_threshold: usize,
    /// Upload a batch once its weight reaches this soft limit.
    pub byte_threshold: usize,
    /// No batch may weigh more than this; heavier single spans bypass batching.
    pub byte_limit: usize,
    /// Ceiling on pending plus in-flight weight; spans beyond it are dropped.
    pub buffered_byte_limit: usize,
}

impl BundlerLimits {
    /// Derives the weight limits from a count threshold the same way the
    /// exporter does: soft ×200, hard ×1000, buffered ×2000. Products that
    /// would overflow saturate at `usize::MAX`.
    pub fn from_count_threshold(count_threshold: usize) -> Self {
        Self {
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            count_threshold,
            byte_threshold: count_threshold.saturating_mul(200),
            byte_limit: count_threshold.saturating_mul(1000),
            buffered_byte_limit: count_threshold.saturating_mul(2000),
        }
    }

    pub fn with_delay_threshold(mut self, delay: Duration) -> Self {
        self.delay_threshold = delay;
        self
    }

    pub fn with_byte_threshold(mut self, limit: usize) -> Self {
        self.byte_threshold = limit;
        self
    }

    pub fn with_byte_limit(mut self, limit: usize) -> Self {
        self.byte_limit = limit;
        self
    }

    pub fn with_buffered_byte_limit(mut self, limit: usize) -> Self {
        self.buffered_byte_limit = limit;
        self
    }
}

impl Default for BundlerLimits {
    fn default() -> Self {
        Self::from_count_threshold(DEFAULT_COUNT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ExporterOptions::new("p").bundler_limits();
        assert_eq!(limits.delay_threshold, Duration::from_secs(2));
        assert_eq!(limits.count_threshold, 50);
        assert_eq!(limits.byte_threshold, 10_000);
        assert_eq!(limits.byte_limit, 50_000);
        assert_eq!(limits.buffered_byte_limit, 100_000);
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let limits = ExporterOptions::new("p")
            .with_delay_threshold(Duration::ZERO)
            .with_count_threshold(0)
            .bundler_limits();
        assert_eq!(limits, BundlerLimits::default());
    }

    #[test]
    fn test_limits_scale_with_count_threshold() {
        let limits = ExporterOptions::new("p")
            .with_count_threshold(10)
            .with_delay_threshold(Duration::from_millis(250))
            .bundler_limits();
        assert_eq!(limits.count_threshold, 10);
        assert_eq!(limits.byte_threshold, 2_000);
        assert_eq!(limits.byte_limit, 10_000);
        assert_eq!(limits.buffered_byte_limit, 20_000);
        assert_eq!(limits.delay_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_huge_count_threshold_saturates() {
        let limits = ExporterOptions::new("p")
            .with_count_threshold(usize::MAX / 500)
            .bundler_limits();
        assert_eq!(limits.byte_threshold, (usize::MAX / 500) * 200);
        assert_eq!(limits.byte_limit, usize::MAX);
        assert_eq!(limits.buffered_byte_limit, usize::MAX);
    }
}
