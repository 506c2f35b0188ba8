use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry,
};

use crate::pipeline::CycleReport;

const NAMESPACE: &str = "ortp_exporter";

/// Prometheus metrics describing the exporter's own operation.
///
/// All metrics use the "ortp_exporter" namespace and live in the same
/// registry as the quality collectors.
#[derive(Clone)]
pub struct PipelineHealth {
    /// Completed pipeline cycles.
    pub cycles: IntCounter,
    /// Wall time of a complete cycle, fetch included.
    pub cycle_duration: Histogram,
    /// Call reports fetched from the store.
    pub records_fetched: Counter,
    /// Diagnostic lines by outcome.
    pub lines: CounterVec,
    /// Observations forwarded to the quality collectors.
    pub observations: Counter,
    /// Samples withheld from the quality collectors, by reason.
    pub samples_dropped: CounterVec,
    /// Failed pushes to the gateway.
    pub push_errors: IntCounter,
    /// Upper bound of the last processed window, epoch milliseconds.
    pub window_upper_bound: Gauge,
}

impl PipelineHealth {
    /// Creates the health metrics and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let cycles = IntCounter::with_opts(
            Opts::new("cycles_total", "Completed pipeline cycles.").namespace(NAMESPACE),
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cycle_duration_seconds",
                "Wall time of one pipeline cycle.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let records_fetched = Counter::with_opts(
            Opts::new(
                "records_fetched_total",
                "Call reports fetched from the store.",
            )
            .namespace(NAMESPACE),
        )?;
        let lines = CounterVec::new(
            Opts::new("lines_total", "Diagnostic lines by parse result.").namespace(NAMESPACE),
            &["result"],
        )?;
        let observations = Counter::with_opts(
            Opts::new(
                "observations_total",
                "Observations recorded into the quality collectors.",
            )
            .namespace(NAMESPACE),
        )?;
        let samples_dropped = CounterVec::new(
            Opts::new(
                "samples_dropped_total",
                "Samples withheld from the quality collectors by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let push_errors = IntCounter::with_opts(
            Opts::new("push_errors_total", "Failed pushes to the gateway.").namespace(NAMESPACE),
        )?;
        let window_upper_bound = Gauge::with_opts(
            Opts::new(
                "window_upper_bound_ms",
                "Upper insert-time bound of the last processed window.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(records_fetched.clone()))?;
        registry.register(Box::new(lines.clone()))?;
        registry.register(Box::new(observations.clone()))?;
        registry.register(Box::new(samples_dropped.clone()))?;
        registry.register(Box::new(push_errors.clone()))?;
        registry.register(Box::new(window_upper_bound.clone()))?;

        Ok(Self {
            cycles,
            cycle_duration,
            records_fetched,
            lines,
            observations,
            samples_dropped,
            push_errors,
            window_upper_bound,
        })
    }

    /// Fold one cycle's report into the counters.
    pub fn observe_cycle(&self, report: &CycleReport, upper_bound: i64, elapsed: Duration) {
        self.cycles.inc();
        self.cycle_duration.observe(elapsed.as_secs_f64());
        self.records_fetched.inc_by(report.records as f64);
        self.window_upper_bound.set(upper_bound as f64);

        for (result, count) in report.lines.by_result() {
            if count > 0 {
                self.lines.with_label_values(&[result]).inc_by(count as f64);
            }
        }

        self.observations.inc_by(report.samples.recorded as f64);

        let dropped = [
            ("relay_mismatch", report.samples.relay_mismatch),
            ("out_of_range", report.samples.out_of_range),
            ("invalid_delay", report.samples.invalid_delay),
            ("index_overflow", report.series.overflowed),
            ("missing_index", report.series.unindexed),
            ("missing_endpoint", report.series.no_endpoint),
        ];
        for (reason, count) in dropped {
            if count > 0 {
                self.samples_dropped
                    .with_label_values(&[reason])
                    .inc_by(count as f64);
            }
        }
    }
}
