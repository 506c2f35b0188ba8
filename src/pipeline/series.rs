//! Index-addressed reconstruction of one call's diagnostic checkpoints.

use std::iter::Enumerate;
use std::slice;

use super::recorder::{LossSnapshot, ObservationSink, Recorder};
use crate::diagnostic::{Measurement, ParsedEntry, RelayEndpoint, RELAY_LEG_COUNT};

/// Number of checkpoint slots per series. Entries at `log_index` values of
/// this or above are rejected and never stored.
pub const SERIES_CAPACITY: usize = 500;

/// Bounds-checked series of up to [`SERIES_CAPACITY`] slots.
///
/// Slots are allocated lazily up to the highest index written. Writing an
/// occupied slot replaces its value.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSeries<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for IndexedSeries<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> IndexedSeries<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` at `index`. Returns false, leaving the series
    /// untouched, when `index` is at or beyond capacity.
    #[must_use]
    pub fn insert(&mut self, index: usize, value: T) -> bool {
        if index >= SERIES_CAPACITY {
            return false;
        }
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(value);
        true
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots in ascending index order.
    pub fn iter(&self) -> Occupied<'_, T> {
        Occupied {
            inner: self.slots.iter().enumerate(),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Iterator over the occupied slots of an [`IndexedSeries`].
pub struct Occupied<'a, T> {
    inner: Enumerate<slice::Iter<'a, Option<T>>>,
}

impl<'a, T> Iterator for Occupied<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }
}

/// Cumulative loss at one relay-leg checkpoint and the relay that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayLossSnapshot {
    pub loss: LossSnapshot,
    pub relay: RelayEndpoint,
}

/// Entries that reconstruction could not place in a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesSkips {
    /// `log_index` at or beyond capacity.
    pub overflowed: u64,
    /// `log_index` negative or too large to address a slot.
    pub unindexed: u64,
    /// Relay-leg entries without a usable relay identity.
    pub no_endpoint: u64,
}

impl SeriesSkips {
    pub fn merge(&mut self, other: &SeriesSkips) {
        self.overflowed += other.overflowed;
        self.unindexed += other.unindexed;
        self.no_endpoint += other.no_endpoint;
    }
}

/// Loss series rebuilt from one call's entries.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedCall {
    /// One series per relay leg, indexed by [`RelayLeg::index`](crate::diagnostic::RelayLeg::index).
    pub legs: [IndexedSeries<RelayLossSnapshot>; RELAY_LEG_COUNT],
    pub end_to_end: IndexedSeries<LossSnapshot>,
    pub skipped: SeriesSkips,
}

/// Rebuild one call's loss series from its entries, in order.
///
/// Delay samples are point measurements and go to `recorder` immediately:
/// relay-leg delays unless the leg bypasses every relay, end-to-end delays
/// always. Loss figures are only stored here; differencing happens later.
pub fn reconstruct<S: ObservationSink + ?Sized>(
    entries: &[ParsedEntry],
    recorder: &mut Recorder<'_, S>,
) -> ReconstructedCall {
    let mut call = ReconstructedCall::default();

    for entry in entries {
        match &entry.measurement {
            Measurement::RelayLeg {
                leg,
                endpoint,
                log_index,
                delay,
                audio_loss,
                video_loss,
            } => {
                let Some(endpoint) = endpoint else {
                    tracing::debug!(
                        session = %entry.session_id,
                        call = %entry.call_id,
                        time = entry.time.as_deref(),
                        leg = %leg,
                        "relay leg without relay identity",
                    );
                    call.skipped.no_endpoint += 1;
                    continue;
                };

                if !endpoint.is_direct() {
                    recorder.relay_delay(endpoint, leg.direction(), *delay);
                }

                let snapshot = RelayLossSnapshot {
                    loss: LossSnapshot {
                        audio: *audio_loss,
                        video: *video_loss,
                    },
                    relay: endpoint.clone(),
                };
                place(
                    &mut call.legs[leg.index()],
                    entry,
                    *log_index,
                    snapshot,
                    &mut call.skipped,
                );
            }
            Measurement::EndToEndDelay { delay, .. } => recorder.e2e_delay(*delay),
            Measurement::EndToEndLoss {
                log_index,
                audio_loss,
                video_loss,
            } => {
                let snapshot = LossSnapshot {
                    audio: *audio_loss,
                    video: *video_loss,
                };
                place(
                    &mut call.end_to_end,
                    entry,
                    *log_index,
                    snapshot,
                    &mut call.skipped,
                );
            }
            Measurement::Other { .. } => {}
        }
    }

    call
}

fn place<T>(
    series: &mut IndexedSeries<T>,
    entry: &ParsedEntry,
    log_index: Option<usize>,
    value: T,
    skipped: &mut SeriesSkips,
) {
    let Some(index) = log_index else {
        tracing::debug!(
            session = %entry.session_id,
            call = %entry.call_id,
            time = entry.time.as_deref(),
            "log index cannot address a slot",
        );
        skipped.unindexed += 1;
        return;
    };
    if !series.insert(index, value) {
        tracing::debug!(
            session = %entry.session_id,
            call = %entry.call_id,
            time = entry.time.as_deref(),
            index,
            "log index beyond series capacity",
        );
        skipped.overflowed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Direction, EndToEndDirection, RelayLeg};
    use crate::pipeline::recorder::testing::{CaptureSink, Observation};
    use crate::relay::RelayTable;

    fn leg_entry(leg: RelayLeg, ip_id: &str, log_index: Option<usize>, delay: f64) -> ParsedEntry {
        ParsedEntry {
            session_id: "s".to_string(),
            call_id: "c".to_string(),
            time: None,
            measurement: Measurement::RelayLeg {
                leg,
                endpoint: RelayEndpoint::parse(ip_id),
                log_index,
                delay,
                audio_loss: 1.0,
                video_loss: 2.0,
            },
        }
    }

    fn relays() -> RelayTable {
        [(7, "10.0.0.7".to_string())].into_iter().collect()
    }

    #[test]
    fn test_series_capacity() {
        let mut series = IndexedSeries::new();
        assert!(series.insert(0, 'a'));
        assert!(series.insert(499, 'b'));
        assert!(!series.insert(500, 'c'));
        assert!(!series.insert(10_000, 'd'));

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(499), Some(&'b'));
        assert_eq!(series.get(500), None);
    }

    #[test]
    fn test_series_last_write_wins_and_ascending_iter() {
        let mut series = IndexedSeries::new();
        assert!(series.insert(5, 50));
        assert!(series.insert(2, 20));
        assert!(series.insert(5, 55));

        let items: Vec<_> = series.iter().map(|(i, v)| (i, *v)).collect();
        assert_eq!(items, vec![(2, 20), (5, 55)]);
        assert!(!series.is_empty());
        assert!(IndexedSeries::<u8>::new().is_empty());
    }

    #[test]
    fn test_relay_leg_delay_emitted_immediately() {
        let relays = relays();
        let sink = CaptureSink::default();
        let mut recorder = Recorder::new(&relays, &sink);

        let entries = vec![
            leg_entry(RelayLeg::Cru, "10.0.0.7_7", Some(0), 30.0),
            leg_entry(RelayLeg::Cld, "10.0.0.7_7", Some(0), 40.0),
        ];
        let call = reconstruct(&entries, &mut recorder);

        assert_eq!(
            sink.take(),
            vec![
                Observation::RelayDelay {
                    id: "7".to_string(),
                    ip: "10.0.0.7".to_string(),
                    direction: Direction::Down,
                    value: 30.0,
                },
                Observation::RelayDelay {
                    id: "7".to_string(),
                    ip: "10.0.0.7".to_string(),
                    direction: Direction::Up,
                    value: 40.0,
                },
            ]
        );
        assert_eq!(call.legs[RelayLeg::Cru.index()].len(), 1);
        assert_eq!(call.legs[RelayLeg::Cld.index()].len(), 1);
        assert!(call.legs[RelayLeg::Clu.index()].is_empty());
    }

    #[test]
    fn test_direct_leg_skips_delay_but_keeps_loss() {
        let relays = relays();
        let sink = CaptureSink::default();
        let mut recorder = Recorder::new(&relays, &sink);

        let entries = vec![leg_entry(RelayLeg::Clu, "10.0.0.7_-1", Some(3), 30.0)];
        let call = reconstruct(&entries, &mut recorder);

        assert!(sink.take().is_empty());
        assert_eq!(recorder.stats().relay_mismatch, 0);
        let slot = call.legs[RelayLeg::Clu.index()].get(3).unwrap();
        assert!(slot.relay.is_direct());
    }

    #[test]
    fn test_leg_without_endpoint_ignored() {
        let relays = relays();
        let sink = CaptureSink::default();
        let mut recorder = Recorder::new(&relays, &sink);

        let entries = vec![leg_entry(RelayLeg::Crd, "10.0.0.7", Some(1), 30.0)];
        let call = reconstruct(&entries, &mut recorder);

        assert!(sink.take().is_empty());
        assert!(call.legs[RelayLeg::Crd.index()].is_empty());
        assert_eq!(call.skipped.no_endpoint, 1);
    }

    #[test]
    fn test_out_of_capacity_and_unindexed_entries() {
        let relays = relays();
        let sink = CaptureSink::default();
        let mut recorder = Recorder::new(&relays, &sink);

        let entries = vec![
            leg_entry(RelayLeg::Clu, "10.0.0.7_7", Some(500), 30.0),
            // A negative logIndex decodes to no slot at all.
            leg_entry(RelayLeg::Clu, "10.0.0.7_7", None, 30.0),
        ];
        let call = reconstruct(&entries, &mut recorder);

        // Delays are still observed; only the loss slots are rejected.
        assert_eq!(sink.take().len(), 2);
        assert!(call.legs[RelayLeg::Clu.index()].is_empty());
        assert_eq!(call.skipped.overflowed, 1);
        assert_eq!(call.skipped.unindexed, 1);
    }

    #[test]
    fn test_end_to_end_entries() {
        let relays = RelayTable::default();
        let sink = CaptureSink::default();
        let mut recorder = Recorder::new(&relays, &sink);

        let entries = vec![
            ParsedEntry {
                session_id: "s".to_string(),
                call_id: "c".to_string(),
                time: None,
                measurement: Measurement::EndToEndDelay {
                    direction: EndToEndDirection::RemoteToLocal,
                    delay: 90.0,
                },
            },
            ParsedEntry {
                session_id: "s".to_string(),
                call_id: "c".to_string(),
                time: None,
                measurement: Measurement::EndToEndLoss {
                    log_index: Some(4),
                    audio_loss: 3.0,
                    video_loss: 6.0,
                },
            },
        ];
        let call = reconstruct(&entries, &mut recorder);

        assert_eq!(
            sink.take(),
            vec![Observation::E2eDelay {
                kind: "e2e".to_string(),
                value: 90.0,
            }]
        );
        assert_eq!(
            call.end_to_end.get(4),
            Some(&LossSnapshot {
                audio: 3.0,
                video: 6.0,
            })
        );
    }
}
