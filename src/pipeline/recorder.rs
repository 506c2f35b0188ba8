//! Validation gate between the pipeline and the metric collectors.
//!
//! Every delay and loss sample passes through [`Recorder`], which enforces
//! the relay allow-list and the value ranges before anything reaches an
//! [`ObservationSink`].

use std::fmt;

use crate::diagnostic::{Direction, RelayEndpoint};
use crate::relay::RelayTable;

/// Label value shared by every end-to-end observation.
pub const E2E_LABEL: &str = "e2e";

/// Audio loss deltas must fall in `[0, AUDIO_LOSS_LIMIT)`.
pub const AUDIO_LOSS_LIMIT: f64 = 2_000.0;

/// Video loss deltas must fall in `[0, VIDEO_LOSS_LIMIT)`.
pub const VIDEO_LOSS_LIMIT: f64 = 10_000.0;

/// End-to-end delays must be below this.
pub const E2E_DELAY_LIMIT: f64 = 20_000.0;

/// Media stream a loss figure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Content {
    Audio,
    Video,
}

impl Content {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Exclusive upper bound of a valid loss value.
    pub const fn limit(self) -> f64 {
        match self {
            Self::Audio => AUDIO_LOSS_LIMIT,
            Self::Video => VIDEO_LOSS_LIMIT,
        }
    }

    /// Returns true if `loss` is within `[0, limit)`.
    pub fn in_range(self, loss: f64) -> bool {
        (0.0..self.limit()).contains(&loss)
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio and video loss figures of one checkpoint or interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossSnapshot {
    pub audio: f64,
    pub video: f64,
}

impl std::ops::Sub for LossSnapshot {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            audio: self.audio - rhs.audio,
            video: self.video - rhs.video,
        }
    }
}

/// Destination of validated observations.
///
/// Implementations must be safe to call while another thread reads them.
pub trait ObservationSink: Send + Sync {
    fn relay_delay(&self, relay: &RelayEndpoint, direction: Direction, delay: f64);

    fn relay_loss(&self, relay: &RelayEndpoint, direction: Direction, content: Content, loss: f64);

    fn e2e_delay(&self, kind: &str, delay: f64);

    fn e2e_loss(&self, kind: &str, content: Content, loss: f64);
}

/// Counts of samples offered to a [`Recorder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Observations forwarded to the sink.
    pub recorded: u64,
    /// Relay samples whose id and IP do not match the allow-list.
    pub relay_mismatch: u64,
    /// Loss values outside their valid range.
    pub out_of_range: u64,
    /// Zero or non-finite delays, and end-to-end delays at or above the limit.
    pub invalid_delay: u64,
}

/// Gatekeeper in front of an [`ObservationSink`].
///
/// Relay samples pass only when the relay table maps their id to exactly
/// their IP. Loss values are range checked per content. Nothing rejected
/// here reaches the sink.
pub struct Recorder<'a, S: ?Sized> {
    relays: &'a RelayTable,
    sink: &'a S,
    stats: RecordStats,
}

impl<'a, S: ObservationSink + ?Sized> Recorder<'a, S> {
    pub fn new(relays: &'a RelayTable, sink: &'a S) -> Self {
        Self {
            relays,
            sink,
            stats: RecordStats::default(),
        }
    }

    pub fn stats(&self) -> RecordStats {
        self.stats
    }

    pub fn relay_delay(&mut self, relay: &RelayEndpoint, direction: Direction, delay: f64) {
        if delay == 0.0 || !delay.is_finite() {
            self.stats.invalid_delay += 1;
            return;
        }
        if !self.relays.matches(relay) {
            self.stats.relay_mismatch += 1;
            return;
        }

        self.sink.relay_delay(relay, direction, delay);
        self.stats.recorded += 1;
    }

    pub fn relay_loss(&mut self, relay: &RelayEndpoint, direction: Direction, loss: LossSnapshot) {
        if !self.relays.matches(relay) {
            self.stats.relay_mismatch += 1;
            return;
        }

        for (content, value) in [(Content::Audio, loss.audio), (Content::Video, loss.video)] {
            if self.check_range(content, value) {
                self.sink.relay_loss(relay, direction, content, value);
                self.stats.recorded += 1;
            }
        }
    }

    pub fn e2e_delay(&mut self, delay: f64) {
        if delay == 0.0 || !delay.is_finite() || delay >= E2E_DELAY_LIMIT {
            self.stats.invalid_delay += 1;
            return;
        }

        self.sink.e2e_delay(E2E_LABEL, delay);
        self.stats.recorded += 1;
    }

    pub fn e2e_loss(&mut self, loss: LossSnapshot) {
        for (content, value) in [(Content::Audio, loss.audio), (Content::Video, loss.video)] {
            if self.check_range(content, value) {
                self.sink.e2e_loss(E2E_LABEL, content, value);
                self.stats.recorded += 1;
            }
        }
    }

    fn check_range(&mut self, content: Content, value: f64) -> bool {
        if content.in_range(value) {
            return true;
        }

        tracing::debug!(
            content = %content,
            value,
            limit = content.limit(),
            "dropping out-of-range loss sample",
        );
        self.stats.out_of_range += 1;
        false
    }
}
