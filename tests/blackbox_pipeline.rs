use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ortp_exporter::config::{Config, RelayConfig};
use ortp_exporter::export::server::encode_text;
use ortp_exporter::export::{PipelineHealth, QualityMetrics};
use ortp_exporter::pipeline::process_records;
use ortp_exporter::relay::RelayTable;
use ortp_exporter::scheduler::Scheduler;
use ortp_exporter::store::{CallRecord, RecordStore, Window};
use parking_lot::Mutex;
use prometheus::Registry;

const RELAY_ID: &str = "1001";
const RELAY_IP: &str = "10.0.0.1";

fn relays() -> RelayTable {
    [(1001, RELAY_IP.to_string())].into_iter().collect()
}

fn ortp(body: &str) -> String {
    format!("[12:00:01]ortp {body}")
}

fn record(sid: &str, lines: Vec<String>) -> CallRecord {
    CallRecord {
        session_id: sid.to_string(),
        diagnostic_lines: lines,
    }
}

/// One call crossing relay 1001 downstream, with a spoofed checkpoint at the
/// end, plus end-to-end delay and loss.
fn call_report(sid: &str, cid: &str) -> CallRecord {
    record(
        sid,
        vec![
            ortp(&format!(
                "sub_type=CLU cid={cid} dst=10.0.0.1_1001 logIndex=0 delay_aver=80 a_loss=5 v_loss=100"
            )),
            "[12:00:01]rtcp sub_type=RR cid=x jitter=4".to_string(),
            ortp(&format!(
                "sub_type=CLU cid={cid} dst=10.0.0.1_1001 logIndex=1 delay_aver=90 a_loss=12 v_loss=150"
            )),
            ortp(&format!(
                "sub_type=CLU cid={cid} dst=10.0.0.9_1001 logIndex=2 delay_aver=70 a_loss=20 v_loss=160"
            )),
            ortp(&format!("sub_type=CE2E_R2L cid={cid} delay_aver=150")),
            ortp(&format!("sub_type=CE2E_L2R cid={cid} delay_aver=25000")),
            ortp(&format!(
                "sub_type=CSR cid={cid} logIndex=0 a_loss=10 v_after_fec_recover_loss=50"
            )),
            ortp(&format!(
                "sub_type=CSR cid={cid} logIndex=1 a_loss=8 v_after_fec_recover_loss=20"
            )),
        ],
    )
}

fn relay_delay_count(metrics: &QualityMetrics, direction: &str) -> u64 {
    metrics
        .relay_delay
        .histogram
        .with_label_values(&[RELAY_ID, RELAY_IP, direction])
        .get_sample_count()
}

fn relay_loss(metrics: &QualityMetrics, content: &str) -> (u64, f64) {
    let histogram = metrics
        .relay_loss
        .histogram
        .with_label_values(&[RELAY_ID, RELAY_IP, "Down", content]);
    (histogram.get_sample_count(), histogram.get_sample_sum())
}

fn e2e_loss(metrics: &QualityMetrics, content: &str) -> (u64, f64) {
    let histogram = metrics
        .e2e_loss
        .histogram
        .with_label_values(&["e2e", content]);
    (histogram.get_sample_count(), histogram.get_sample_sum())
}

#[test]
fn pipeline_blackbox_correctness_and_invariants() {
    let registry = Registry::new();
    let metrics = QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();

    let report = process_records(&[call_report("sess-1", "c1")], &relays(), &metrics);

    assert_eq!(report.records, 1);
    assert_eq!(report.sessions, 1);
    assert_eq!(report.calls, 1);
    assert_eq!(report.lines.parsed, 6);
    assert_eq!(report.lines.not_ortp, 1);
    assert_eq!(report.lines.outlier, 1);

    // Only the two checkpoints from the registered address count.
    assert_eq!(relay_delay_count(&metrics, "Down"), 2);
    assert_eq!(relay_delay_count(&metrics, "Up"), 0);
    assert_eq!(
        metrics
            .relay_delay
            .summary
            .sample_count(&[RELAY_ID, RELAY_IP, "Down"]),
        2
    );

    // Cumulative 5 -> 12 becomes 5 then 7; the spoofed third delta is dropped.
    assert_eq!(relay_loss(&metrics, "audio"), (2, 12.0));
    assert_eq!(relay_loss(&metrics, "video"), (2, 150.0));
    assert!(report.samples.relay_mismatch >= 2);

    // The end-to-end counter went backwards: only the first interval survives.
    assert_eq!(e2e_loss(&metrics, "audio"), (1, 10.0));
    assert_eq!(e2e_loss(&metrics, "video"), (1, 50.0));

    let e2e_delay = metrics.e2e_delay.histogram.with_label_values(&["e2e"]);
    assert_eq!(e2e_delay.get_sample_count(), 1);
    assert_eq!(e2e_delay.get_sample_sum(), 150.0);
}

#[test]
fn pipeline_blackbox_exposition_text() {
    let registry = Registry::new();
    let metrics = QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();

    process_records(&[call_report("sess-1", "c1")], &relays(), &metrics);

    let text = encode_text(&registry).unwrap();
    assert!(text.contains("# TYPE rt_H_relay histogram"));
    assert!(text.contains("# TYPE rt_S_relay summary"));
    assert!(text.contains("# TYPE rt_H_e2eLoss histogram"));
    assert!(text.contains("rt_S_e2eDelay_count{type=\"e2e\"} 1"));
    assert!(text.contains("quantile=\"0.5\""));
    assert!(!text.contains("10.0.0.9"));
}

#[test]
fn pipeline_blackbox_unregistered_relays_yield_no_relay_metrics() {
    let registry = Registry::new();
    let metrics = QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();

    let report = process_records(
        &[call_report("sess-1", "c1")],
        &RelayTable::default(),
        &metrics,
    );

    assert_eq!(relay_delay_count(&metrics, "Down"), 0);
    assert_eq!(relay_loss(&metrics, "audio").0, 0);
    // End-to-end metrics do not depend on the relay table.
    assert_eq!(e2e_loss(&metrics, "audio"), (1, 10.0));
    assert!(report.samples.relay_mismatch > 0);
}

#[test]
fn pipeline_blackbox_sessions_and_calls_stay_separate() {
    let registry = Registry::new();
    let metrics = QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();

    let records = vec![
        call_report("sess-1", "c1"),
        call_report("sess-1", "c2"),
        call_report("sess-2", "c1"),
    ];
    let report = process_records(&records, &relays(), &metrics);

    assert_eq!(report.sessions, 2);
    assert_eq!(report.calls, 3);
    // Each call restarts its baseline, so every first interval is kept.
    assert_eq!(e2e_loss(&metrics, "audio"), (3, 30.0));
    assert_eq!(relay_loss(&metrics, "audio"), (6, 36.0));
}

/// Reports stamped with their insert time, served by window.
#[derive(Default)]
struct MemoryStore {
    reports: Mutex<Vec<(i64, CallRecord)>>,
}

impl MemoryStore {
    fn insert(&self, at: i64, report: CallRecord) {
        self.reports.lock().push((at, report));
    }
}

#[derive(Clone)]
struct SharedStore(Arc<MemoryStore>);

impl RecordStore for SharedStore {
    async fn latest_insert_time(&self) -> Result<Option<i64>> {
        Ok(self.0.reports.lock().iter().map(|(t, _)| *t).max())
    }

    async fn fetch_records(&self, window: &Window) -> Result<Vec<CallRecord>> {
        Ok(self
            .0
            .reports
            .lock()
            .iter()
            .filter(|(t, _)| window.contains(*t))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[tokio::test]
async fn scheduler_blackbox_counts_each_report_once() {
    let registry = Registry::new();
    let metrics = Arc::new(QualityMetrics::new(&registry, &RelayConfig::default()).unwrap());
    let health = PipelineHealth::new(&registry).unwrap();

    let mut cfg = Config::default();
    cfg.output.period = Duration::from_secs(60);
    cfg.window.advance_watermark = true;

    let store = Arc::new(MemoryStore::default());
    let mut scheduler = Scheduler::new(
        SharedStore(store.clone()),
        metrics.clone(),
        Arc::new(relays()),
        &cfg,
    )
    .with_health(health);

    store.insert(1_700_000_000_000, call_report("sess-1", "c1"));
    let first = scheduler.run_cycle().await.unwrap().unwrap();
    assert_eq!(first.records, 1);

    store.insert(1_700_000_030_000, call_report("sess-2", "c1"));
    let second = scheduler.run_cycle().await.unwrap().unwrap();
    assert_eq!(second.records, 1);

    // Nothing new: the next window is empty and nothing is re-observed.
    let third = scheduler.run_cycle().await.unwrap().unwrap();
    assert_eq!(third.records, 0);

    assert_eq!(e2e_loss(&metrics, "audio"), (2, 20.0));
    assert_eq!(scheduler.cursor().watermark(), Some(1_700_000_030_000));

    let text = encode_text(&registry).unwrap();
    assert!(text.contains("ortp_exporter_cycles_total 3"));
    assert!(text.contains("ortp_exporter_records_fetched_total 2"));
    assert!(text.contains("ortp_exporter_window_upper_bound_ms 1700000030000"));
}
