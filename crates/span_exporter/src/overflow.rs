//! Rate-limited reporting of spans dropped because the buffer was full.
//!
//! Sustained overflow produces at most one report per quiet window no matter
//! how many spans are dropped:
//!
//! ```text
//!            drop / report BufferFull, arm
//! ┌──────┐ ─────────────────────────────────► ┌────────┐ ◄─┐ drop / accumulated += 1
//! │ Idle │                                    │ Paused │ ──┘
//! └──────┘ ◄───────────────────────────────── └────────┘ ◄─┐ window elapsed, accumulated > 0
//!            window elapsed, accumulated == 0              │ / report Dropped, reset, re-arm
//!                                                          ┘
//! ```

use crate::timer::Timer;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Minimum time between two overflow reports.
pub const QUIET_WINDOW: Duration = Duration::from_secs(5);

/// A single overflow diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowReport {
    /// First drop after a quiet period.
    BufferFull,
    /// Drops seen during the last quiet window.
    Dropped {
        /// Spans dropped since the previous report.
        count: usize,
        /// Spans dropped since overflow began, including already reported ones.
        episode_total: usize,
    },
}

impl fmt::Display for OverflowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferFull => write!(f, "failed to upload span: buffer full"),
            Self::Dropped {
                count: 1,
                episode_total,
            } => write!(
                f,
                "failed to upload span: buffer full ({} since overflow began)",
                episode_total
            ),
            Self::Dropped {
                count,
                episode_total,
            } => write!(
                f,
                "failed to upload {} spans: buffer full ({} since overflow began)",
                count, episode_total
            ),
        }
    }
}

/// Receives overflow reports. Called with the logger's lock held, so it must
/// not call back into the logger.
pub type ReportSink = Arc<dyn Fn(&OverflowReport) + Send + Sync>;

/// Sink that writes reports through `tracing` at `warn` level.
pub fn tracing_sink() -> ReportSink {
    Arc::new(|report: &OverflowReport| match report {
        OverflowReport::BufferFull => tracing::warn!("{}", report),
        OverflowReport::Dropped {
            count,
            episode_total,
        } => tracing::warn!(dropped = count, episode_total, "{}", report),
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OverflowState {
    paused: bool,
    accumulated: usize,
    episode: usize,
}

struct Inner {
    state: Mutex<OverflowState>,
    quiet_window: Duration,
    timer: Timer,
    sink: ReportSink,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, OverflowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enters (or stays in) the paused state and arms the window callback.
    ///
    /// Must be called with the state lock held so a drop racing the callback
    /// always sees a consistent `paused` flag.
    fn pause(self: &Arc<Self>, state: &mut OverflowState) {
        state.paused = true;
        let inner = Arc::clone(self);
        self.timer
            .schedule(self.quiet_window, move || inner.on_quiet_window());
    }

    fn on_quiet_window(self: &Arc<Self>) {
        let mut state = self.lock();
        match state.accumulated {
            0 => {
                state.paused = false;
                state.episode = 0;
            }
            count => {
                (self.sink)(&OverflowReport::Dropped {
                    count,
                    episode_total: state.episode,
                });
                state.accumulated = 0;
                // Stay paused for one more window so drops made while
                // reporting cannot trigger an immediate second report.
                self.pause(&mut state);
            }
        }
    }
}

/// Ensures overflow drops are reported at most once per quiet window.
#[derive(Clone)]
pub struct OverflowLogger {
    inner: Arc<Inner>,
}

impl OverflowLogger {
    /// Creates a logger with the default 5 second window reporting via `tracing`.
    pub fn new(timer: Timer) -> Self {
        Self::with_sink(timer, QUIET_WINDOW, tracing_sink())
    }

    pub fn with_sink(timer: Timer, quiet_window: Duration, sink: ReportSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(OverflowState::default()),
                quiet_window,
                timer,
                sink,
            }),
        }
    }

    /// Notes one dropped span.
    pub fn record_drop(&self) {
        let mut state = self.inner.lock();
        state.episode += 1;
        if state.paused {
            state.accumulated += 1;
        } else {
            (self.inner.sink)(&OverflowReport::BufferFull);
            self.inner.pause(&mut state);
        }
    }

    /// Returns `true` while reports are being held back.
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Drops seen since the last report.
    pub fn pending_drops(&self) -> usize {
        self.inner.lock().accumulated
    }
}

impl fmt::Debug for OverflowLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowLogger")
            .field("state", &*self.inner.lock())
            .field("quiet_window", &self.inner.quiet_window)
            .finish()
    }
}

/// Sink that records every report (for tests)
#[cfg(test)]
pub(crate) fn recording_sink() -> (ReportSink, Arc<Mutex<Vec<OverflowReport>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&reports);
    let sink: ReportSink = Arc::new(move |report: &OverflowReport| {
        captured.lock().unwrap().push(report.clone());
    });
    (sink, reports)
}
