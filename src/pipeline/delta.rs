//! Conversion of cumulative loss checkpoints into per-interval losses.

use super::recorder::{LossSnapshot, ObservationSink, Recorder};
use super::series::{IndexedSeries, Occupied, ReconstructedCall, RelayLossSnapshot};
use crate::diagnostic::RelayLeg;

/// A checkpoint carrying running loss totals.
pub trait Cumulative {
    fn totals(&self) -> LossSnapshot;
}

impl Cumulative for LossSnapshot {
    fn totals(&self) -> LossSnapshot {
        *self
    }
}

impl Cumulative for RelayLossSnapshot {
    fn totals(&self) -> LossSnapshot {
        self.loss
    }
}

/// Yields each occupied checkpoint with the loss accrued since the previous
/// one. The first checkpoint is measured against zero. Empty slots are
/// skipped and leave the baseline in place.
pub struct Deltas<'a, T> {
    slots: Occupied<'a, T>,
    baseline: Option<LossSnapshot>,
}

impl<'a, T: Cumulative> Iterator for Deltas<'a, T> {
    type Item = (&'a T, LossSnapshot);

    fn next(&mut self) -> Option<Self::Item> {
        let (_, current) = self.slots.next()?;
        let totals = current.totals();
        let delta = match self.baseline {
            Some(baseline) => totals - baseline,
            None => totals,
        };
        self.baseline = Some(totals);
        Some((current, delta))
    }
}

pub fn deltas<T: Cumulative>(series: &IndexedSeries<T>) -> Deltas<'_, T> {
    Deltas {
        slots: series.iter(),
        baseline: None,
    }
}

/// Send every loss delta of `call` through `recorder`.
///
/// Relay-leg deltas are attributed to the relay named by the later of the
/// two checkpoints.
pub fn record_deltas<S: ObservationSink + ?Sized>(
    call: &ReconstructedCall,
    recorder: &mut Recorder<'_, S>,
) {
    for leg in RelayLeg::all() {
        for (snapshot, delta) in deltas(&call.legs[leg.index()]) {
            recorder.relay_loss(&snapshot.relay, leg.direction(), delta);
        }
    }

    for (_, delta) in deltas(&call.end_to_end) {
        recorder.e2e_loss(delta);
    }
}
