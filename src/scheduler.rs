use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::{PipelineHealth, Pusher};
use crate::pipeline::{self, CycleReport, ObservationSink};
use crate::relay::RelayTable;
use crate::store::{RecordStore, Window, WindowCursor};

/// Drives one fetch-to-record pass per period.
///
/// Owns the store handle and the window cursor. Store failures end the loop
/// with an error; push failures are logged and counted.
pub struct Scheduler<S, O: ?Sized> {
    store: S,
    sink: Arc<O>,
    relays: Arc<RelayTable>,
    cursor: WindowCursor,
    period: Duration,
    health: Option<PipelineHealth>,
    pusher: Option<Pusher>,
}

impl<S: RecordStore, O: ObservationSink + ?Sized> Scheduler<S, O> {
    pub fn new(store: S, sink: Arc<O>, relays: Arc<RelayTable>, cfg: &Config) -> Self {
        Self {
            store,
            sink,
            relays,
            cursor: WindowCursor::new(cfg.window.advance_watermark),
            period: cfg.output.period,
            health: None,
            pusher: None,
        }
    }

    pub fn with_health(mut self, health: PipelineHealth) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_pusher(mut self, pusher: Pusher) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn cursor(&self) -> &WindowCursor {
        &self.cursor
    }

    /// Runs one pass. Returns `None` when the store holds no reports yet.
    pub async fn run_cycle(&mut self) -> Result<Option<CycleReport>> {
        let start = Instant::now();

        let Some(latest) = self
            .store
            .latest_insert_time()
            .await
            .context("fetching latest insert time")?
        else {
            debug!("store holds no reports, skipping cycle");
            return Ok(None);
        };

        let window = self.cursor.window(latest, self.period);
        let records = if window.is_empty() {
            Vec::new()
        } else {
            self.store
                .fetch_records(&window)
                .await
                .with_context(|| format!("fetching reports in {}", describe(&window)))?
        };

        let report = pipeline::process_records(&records, &self.relays, self.sink.as_ref());
        self.cursor.advance(&window);

        let elapsed = start.elapsed();
        if let Some(health) = &self.health {
            health.observe_cycle(&report, window.upper, elapsed);
        }

        info!(
            window = %describe(&window),
            records = report.records,
            sessions = report.sessions,
            calls = report.calls,
            lines_parsed = report.lines.parsed,
            lines_rejected = report.lines.rejected(),
            observations = report.samples.recorded,
            relay_mismatch = report.samples.relay_mismatch,
            out_of_range = report.samples.out_of_range,
            elapsed_ms = elapsed.as_millis() as u64,
            "cycle complete",
        );

        Ok(Some(report))
    }

    /// Pushes the registry if a pusher is configured. Never fails.
    pub async fn push(&self) {
        let Some(pusher) = &self.pusher else {
            return;
        };

        if let Err(e) = pusher.push().await {
            warn!(error = %e, url = %pusher.url(), "push to gateway failed");
            if let Some(health) = &self.health {
                health.push_errors.inc();
            }
        }
    }

    /// Loops until `cancel` fires or the store fails.
    ///
    /// Cancellation is observed between cycles and during the sleep; a cycle
    /// in flight is abandoned, not drained.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(period = ?self.period, "scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_cycle() => {
                    result?;
                }
            }

            self.push().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }
}

fn describe(window: &Window) -> String {
    let close = if window.upper_inclusive { ']' } else { ')' };
    format!(
        "({}, {}{close}",
        render_millis(window.lower),
        render_millis(window.upper)
    )
}

/// Renders epoch milliseconds as RFC 3339, falling back to the raw number.
fn render_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
