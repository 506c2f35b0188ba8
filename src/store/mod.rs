pub mod mongo;

use std::time::Duration;

use anyhow::Result;

pub use mongo::MongoStore;

/// One call report as fetched from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRecord {
    pub session_id: String,
    /// Raw diagnostic lines in document order.
    pub diagnostic_lines: Vec<String>,
}

/// Insert-time bounds of one fetch, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Exclusive lower bound.
    pub lower: i64,
    pub upper: i64,
    /// Whether `upper` itself is part of the window.
    pub upper_inclusive: bool,
}

impl Window {
    /// Returns true if `insert_time` falls inside the window.
    pub fn contains(&self, insert_time: i64) -> bool {
        if insert_time <= self.lower {
            return false;
        }
        if self.upper_inclusive {
            insert_time <= self.upper
        } else {
            insert_time < self.upper
        }
    }

    /// True when no timestamp can satisfy the bounds.
    pub fn is_empty(&self) -> bool {
        if self.upper_inclusive {
            self.upper <= self.lower
        } else {
            self.upper <= self.lower.saturating_add(1)
        }
    }
}

/// Tracks where the next query window starts.
///
/// With advancing enabled, each window begins at the previous window's upper
/// bound and includes its own upper bound, so consecutive windows tile the
/// timeline without overlap or gap. Without it, every window is
/// `(latest - period, latest)` and the watermark is never consulted.
#[derive(Debug, Clone, Copy)]
pub struct WindowCursor {
    watermark: Option<i64>,
    advance: bool,
}

impl WindowCursor {
    pub fn new(advance: bool) -> Self {
        Self {
            watermark: None,
            advance,
        }
    }

    /// Upper bound of the last completed window, if any.
    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    /// Computes the window ending at `latest`.
    pub fn window(&self, latest: i64, period: Duration) -> Window {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        let fallback = latest.saturating_sub(period_ms);

        let lower = match (self.advance, self.watermark) {
            (true, Some(watermark)) => watermark,
            _ => fallback,
        };

        Window {
            lower,
            upper: latest,
            upper_inclusive: self.advance,
        }
    }

    /// Record `window` as completed.
    pub fn advance(&mut self, window: &Window) {
        if self.advance {
            self.watermark = Some(window.upper);
        }
    }
}

/// Read-only access to call reports.
pub trait RecordStore: Send + Sync {
    /// Largest insert time in the collection, `None` if it is empty.
    fn latest_insert_time(&self) -> impl std::future::Future<Output = Result<Option<i64>>> + Send;

    /// Fetch every report inside `window` that carries diagnostic lines.
    fn fetch_records(
        &self,
        window: &Window,
    ) -> impl std::future::Future<Output = Result<Vec<CallRecord>>> + Send;
}
