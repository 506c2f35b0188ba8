//! YAML configuration: store access, output, window policy and relay
//! allow-list, with defaults and validation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the exporter.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    /// Overridden by `--log-level` on the command line.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Metrics exposition listener.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Document store holding the call reports.
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics output toggles and cycle period.
    #[serde(default)]
    pub output: OutputConfig,

    /// Query window behavior.
    #[serde(default)]
    pub window: WindowConfig,

    /// Relay allow-list and collector parameters.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Metrics exposition listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address. Default: "0.0.0.0".
    #[serde(default = "default_gateway_addr")]
    pub addr: String,

    /// Listen port. Default: 9100.
    #[serde(default = "default_http_listen_port")]
    pub http_listen_port: u16,
}

/// MongoDB connection configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Connection string, e.g. "mongodb://127.0.0.1:27017".
    #[serde(default)]
    pub uri: String,

    /// Database holding the report collection.
    #[serde(default)]
    pub database: String,

    /// Collection holding one document per call report.
    #[serde(default)]
    pub collection: String,
}

/// Metrics output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Serve /metrics for scraping. Default: true.
    #[serde(default = "default_true")]
    pub prometheus: bool,

    /// Push the registry to a Pushgateway after every cycle. Default: false.
    #[serde(default)]
    pub push_gateway: bool,

    /// Pushgateway base address, e.g. "http://127.0.0.1:9091".
    #[serde(default)]
    pub push_gateway_addr: String,

    /// Grouping label attached to pushed metrics.
    #[serde(default)]
    pub monitor_id: String,

    /// Time between cycles and width of the first query window. Default: 60s.
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Request timeout for a single push. Default: 10s.
    #[serde(default = "default_push_timeout", with = "humantime_serde")]
    pub push_timeout: Duration,
}

/// Query window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Start each window where the previous one ended. When false, every
    /// cycle queries `latest - period` regardless of earlier cycles.
    /// Default: true.
    #[serde(default = "default_true")]
    pub advance_watermark: bool,
}

/// Relay allow-list and collector parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Trusted relay id to expected IP.
    #[serde(default)]
    pub nodes: HashMap<i64, String>,

    /// Linear bucket layout shared by every histogram.
    #[serde(default)]
    pub histogram: HistogramConfig,

    /// Quantiles reported by every summary.
    #[serde(default = "default_summary_objectives")]
    pub summary_objectives: Vec<QuantileObjective>,

    /// How long a sample counts toward summary quantiles. Default: 10m.
    #[serde(default = "default_summary_max_age", with = "humantime_serde")]
    pub summary_max_age: Duration,

    /// Streams the summary window rotates through. Default: 5.
    #[serde(default = "default_summary_age_buckets")]
    pub summary_age_buckets: u32,

    /// Value precision of summary quantiles, 1 to 5. Default: 3.
    #[serde(default = "default_summary_significant_figures")]
    pub summary_significant_figures: u8,
}

/// Linear histogram bucket layout.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HistogramConfig {
    /// Upper bound of the first bucket. Default: 0.
    #[serde(default)]
    pub start: f64,

    /// Distance between bucket bounds. Default: 50.
    #[serde(default = "default_bucket_width")]
    pub width: f64,

    /// Number of buckets, excluding +Inf. Default: 40.
    #[serde(default = "default_bucket_count")]
    pub count: usize,
}

/// A summary quantile and its tolerated rank error.
///
/// Quantile ranks are read exactly from the window's histogram, so `error`
/// never loosens them; value precision is `summary_significant_figures`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct QuantileObjective {
    pub quantile: f64,
    pub error: f64,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gateway_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_listen_port() -> u16 {
    9100
}

fn default_true() -> bool {
    true
}

fn default_period() -> Duration {
    Duration::from_secs(60)
}

fn default_push_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_bucket_width() -> f64 {
    50.0
}

fn default_bucket_count() -> usize {
    40
}

fn default_summary_objectives() -> Vec<QuantileObjective> {
    vec![
        QuantileObjective {
            quantile: 0.5,
            error: 0.05,
        },
        QuantileObjective {
            quantile: 0.9,
            error: 0.01,
        },
        QuantileObjective {
            quantile: 0.99,
            error: 0.001,
        },
    ]
}

fn default_summary_max_age() -> Duration {
    Duration::from_secs(600)
}

fn default_summary_age_buckets() -> u32 {
    5
}

fn default_summary_significant_figures() -> u8 {
    3
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            output: OutputConfig::default(),
            window: WindowConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: default_gateway_addr(),
            http_listen_port: default_http_listen_port(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prometheus: true,
            push_gateway: false,
            push_gateway_addr: String::new(),
            monitor_id: String::new(),
            period: default_period(),
            push_timeout: default_push_timeout(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            advance_watermark: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            histogram: HistogramConfig::default(),
            summary_objectives: default_summary_objectives(),
            summary_max_age: default_summary_max_age(),
            summary_age_buckets: default_summary_age_buckets(),
            summary_significant_figures: default_summary_significant_figures(),
        }
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            width: default_bucket_width(),
            count: default_bucket_count(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.store.uri.is_empty() {
            bail!("store.uri is required");
        }
        if self.store.database.is_empty() {
            bail!("store.database is required");
        }
        if self.store.collection.is_empty() {
            bail!("store.collection is required");
        }

        if self.output.period.is_zero() {
            bail!("output.period must be positive");
        }

        if self.output.push_gateway {
            if self.output.push_gateway_addr.is_empty() {
                bail!("output.push_gateway_addr is required when push_gateway is enabled");
            }
            if self.output.monitor_id.is_empty() {
                bail!("output.monitor_id is required when push_gateway is enabled");
            }
            if self.output.push_timeout.is_zero() {
                bail!("output.push_timeout must be positive");
            }
        }

        for (id, ip) in &self.relay.nodes {
            if ip.is_empty() {
                bail!("relay.nodes.{id} has an empty IP");
            }
        }

        let histogram = &self.relay.histogram;
        if !histogram.start.is_finite() {
            bail!("relay.histogram.start must be finite");
        }
        if !(histogram.width.is_finite() && histogram.width > 0.0) {
            bail!("relay.histogram.width must be positive");
        }
        if histogram.count == 0 {
            bail!("relay.histogram.count must be at least 1");
        }

        if self.relay.summary_objectives.is_empty() {
            bail!("relay.summary_objectives must not be empty");
        }
        for objective in &self.relay.summary_objectives {
            if !(objective.quantile > 0.0 && objective.quantile < 1.0) {
                bail!(
                    "summary quantile {} must be within (0, 1)",
                    objective.quantile
                );
            }
            if !(objective.error > 0.0 && objective.error < 1.0) {
                bail!(
                    "summary error {} for quantile {} must be within (0, 1)",
                    objective.error,
                    objective.quantile
                );
            }
        }

        if self.relay.summary_max_age.is_zero() {
            bail!("relay.summary_max_age must be positive");
        }
        if self.relay.summary_age_buckets == 0 {
            bail!("relay.summary_age_buckets must be at least 1");
        }
        if !(1..=5).contains(&self.relay.summary_significant_figures) {
            bail!("relay.summary_significant_figures must be within 1..=5");
        }

        Ok(())
    }
}

impl GatewayConfig {
    /// Returns the socket address string the exposition server binds to.
    pub fn bind_addr(&self) -> String {
        let host = if self.addr.is_empty() {
            "0.0.0.0"
        } else {
            self.addr.as_str()
        };
        format!("{host}:{}", self.http_listen_port)
    }
}
