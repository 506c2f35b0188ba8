use anyhow::{Context, Result};
use prometheus::{linear_buckets, HistogramOpts, HistogramVec, Opts, Registry};

use super::summary::{SummaryLayout, SummaryVec};
use crate::config::RelayConfig;
use crate::diagnostic::{Direction, RelayEndpoint};
use crate::pipeline::{Content, ObservationSink};

const NAMESPACE: &str = "rt";
const HISTOGRAM_SUBSYSTEM: &str = "H";
const SUMMARY_SUBSYSTEM: &str = "S";

const RELAY_LABELS: &[&str] = &["RelayId", "IP", "direction"];
const RELAY_LOSS_LABELS: &[&str] = &["RelayId", "IP", "direction", "content"];
const E2E_DELAY_LABELS: &[&str] = &["type"];
const E2E_LOSS_LABELS: &[&str] = &["type", "content"];

/// Histogram and summary pair sharing a name and label set.
#[derive(Clone)]
pub struct QualityFamily {
    pub histogram: HistogramVec,
    pub summary: SummaryVec,
}

impl QualityFamily {
    fn new(name: &str, labels: &[&str], buckets: &[f64], cfg: &RelayConfig) -> Result<Self> {
        let histogram = HistogramVec::new(
            HistogramOpts::new(name, format!("{name} histogram"))
                .namespace(NAMESPACE)
                .subsystem(HISTOGRAM_SUBSYSTEM)
                .buckets(buckets.to_vec()),
            labels,
        )
        .with_context(|| format!("creating {name} histogram"))?;

        let summary = SummaryVec::new(
            Opts::new(name, format!("{name} summary"))
                .namespace(NAMESPACE)
                .subsystem(SUMMARY_SUBSYSTEM)
                .variable_labels(labels.iter().map(|l| l.to_string()).collect()),
            &SummaryLayout::from_config(cfg),
        )
        .with_context(|| format!("creating {name} summary"))?;

        Ok(Self { histogram, summary })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.histogram.clone()))?;
        registry.register(Box::new(self.summary.clone()))?;
        Ok(())
    }

    fn observe(&self, label_values: &[&str], value: f64) {
        match self.histogram.get_metric_with_label_values(label_values) {
            Ok(histogram) => histogram.observe(value),
            Err(e) => tracing::warn!(error = %e, "observing histogram"),
        }
        if let Err(e) = self.summary.observe(label_values, value) {
            tracing::warn!(error = %e, "observing summary");
        }
    }
}

/// The call-quality collectors: relay delay, relay loss, end-to-end delay
/// and end-to-end loss, each as a histogram and a summary.
#[derive(Clone)]
pub struct QualityMetrics {
    pub relay_delay: QualityFamily,
    pub relay_loss: QualityFamily,
    pub e2e_delay: QualityFamily,
    pub e2e_loss: QualityFamily,
}

impl QualityMetrics {
    /// Creates every collector and registers it with `registry`.
    pub fn new(registry: &Registry, cfg: &RelayConfig) -> Result<Self> {
        let layout = &cfg.histogram;
        let buckets = linear_buckets(layout.start, layout.width, layout.count)
            .context("building histogram buckets")?;

        let metrics = Self {
            relay_delay: QualityFamily::new("relay", RELAY_LABELS, &buckets, cfg)?,
            relay_loss: QualityFamily::new("relayloss", RELAY_LOSS_LABELS, &buckets, cfg)?,
            e2e_delay: QualityFamily::new("e2eDelay", E2E_DELAY_LABELS, &buckets, cfg)?,
            e2e_loss: QualityFamily::new("e2eLoss", E2E_LOSS_LABELS, &buckets, cfg)?,
        };

        for family in [
            &metrics.relay_delay,
            &metrics.relay_loss,
            &metrics.e2e_delay,
            &metrics.e2e_loss,
        ] {
            family
                .register(registry)
                .context("registering quality metrics")?;
        }

        Ok(metrics)
    }
}

impl ObservationSink for QualityMetrics {
    fn relay_delay(&self, relay: &RelayEndpoint, direction: Direction, delay: f64) {
        self.relay_delay
            .observe(&[&relay.id, &relay.ip, direction.as_str()], delay);
    }

    fn relay_loss(&self, relay: &RelayEndpoint, direction: Direction, content: Content, loss: f64) {
        self.relay_loss.observe(
            &[&relay.id, &relay.ip, direction.as_str(), content.as_str()],
            loss,
        );
    }

    fn e2e_delay(&self, kind: &str, delay: f64) {
        self.e2e_delay.observe(&[kind], delay);
    }

    fn e2e_loss(&self, kind: &str, content: Content, loss: f64) {
        self.e2e_loss.observe(&[kind, content.as_str()], loss);
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{Encoder, TextEncoder};

    use super::*;
    use crate::config::HistogramConfig;

    fn encode(registry: &Registry) -> String {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buf)
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn endpoint() -> RelayEndpoint {
        RelayEndpoint {
            ip: "10.0.0.1".to_string(),
            id: "1001".to_string(),
        }
    }

    #[test]
    fn test_metric_names_and_labels() {
        let registry = Registry::new();
        let metrics = QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();

        metrics.relay_delay(&endpoint(), Direction::Down, 120.0);
        metrics.relay_loss(&endpoint(), Direction::Up, Content::Video, 3.0);
        metrics.e2e_delay("e2e", 200.0);
        metrics.e2e_loss("e2e", Content::Audio, 1.0);

        let text = encode(&registry);
        assert!(text
            .contains("rt_H_relay_count{IP=\"10.0.0.1\",RelayId=\"1001\",direction=\"Down\"} 1"));
        assert!(text.contains("# TYPE rt_S_relay summary"));
        assert!(text.contains(
            "rt_H_relayloss_sum{IP=\"10.0.0.1\",RelayId=\"1001\",content=\"video\",direction=\"Up\"} 3"
        ));
        assert!(text.contains("rt_H_e2eDelay_count{type=\"e2e\"} 1"));
        assert!(text.contains("rt_S_e2eLoss_count{content=\"audio\",type=\"e2e\"} 1"));
    }

    #[test]
    fn test_linear_bucket_layout() {
        let registry = Registry::new();
        let cfg = RelayConfig {
            histogram: HistogramConfig {
                start: 10.0,
                width: 20.0,
                count: 3,
            },
            ..Default::default()
        };
        let metrics = QualityMetrics::new(&registry, &cfg).unwrap();
        metrics.e2e_delay("e2e", 25.0);

        let text = encode(&registry);
        assert!(text.contains("rt_H_e2eDelay_bucket{type=\"e2e\",le=\"10\"} 0"));
        assert!(text.contains("rt_H_e2eDelay_bucket{type=\"e2e\",le=\"30\"} 1"));
        assert!(text.contains("rt_H_e2eDelay_bucket{type=\"e2e\",le=\"50\"} 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        QualityMetrics::new(&registry, &RelayConfig::default()).unwrap();
        assert!(QualityMetrics::new(&registry, &RelayConfig::default()).is_err());
    }
}
