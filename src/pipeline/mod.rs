//! The per-cycle extraction pipeline: records to validated observations.
//!
//! Stages run strictly in order. Grouping parses and partitions records by
//! session then call; reconstruction places each call's checkpoints into
//! index-addressed series and observes delays; differencing turns the
//! cumulative loss series into interval losses. Every observation passes
//! through a [`Recorder`] before it reaches the sink.

pub mod delta;
pub mod group;
pub mod recorder;
pub mod series;

use crate::relay::RelayTable;
use crate::store::CallRecord;

pub use group::LineStats;
pub use recorder::{Content, LossSnapshot, ObservationSink, RecordStats, Recorder};
pub use series::SeriesSkips;

/// What one pipeline pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub records: usize,
    pub sessions: usize,
    pub calls: usize,
    pub lines: LineStats,
    pub series: SeriesSkips,
    pub samples: RecordStats,
}

/// Run every stage over `records`, sending observations to `sink`.
pub fn process_records<S: ObservationSink + ?Sized>(
    records: &[CallRecord],
    relays: &RelayTable,
    sink: &S,
) -> CycleReport {
    let mut report = CycleReport {
        records: records.len(),
        ..Default::default()
    };

    let sessions = group::group_by_session(records, &mut report.lines);
    report.sessions = sessions.len();

    let mut recorder = Recorder::new(relays, sink);
    for session in sessions {
        for call in group::group_by_call(session) {
            report.calls += 1;

            let reconstructed = series::reconstruct(&call.entries, &mut recorder);
            delta::record_deltas(&reconstructed, &mut recorder);
            report.series.merge(&reconstructed.skipped);
        }
    }
    report.samples = recorder.stats();

    report
}
