use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc, Describer};
use prometheus::proto::{LabelPair, Metric, MetricFamily, MetricType, Quantile, Summary};
use prometheus::Opts;

use crate::config::RelayConfig;

/// Observed values are stored in thousandths.
const SCALE: f64 = 1_000.0;

/// Quantiles and sliding window shared by every summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLayout {
    pub quantiles: Vec<f64>,
    /// Samples older than this stop counting toward quantiles.
    pub max_age: Duration,
    /// Number of streams the window rotates through.
    pub age_buckets: u32,
    /// HDR histogram precision of each stream.
    pub significant_figures: u8,
}

impl SummaryLayout {
    pub fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            quantiles: cfg.summary_objectives.iter().map(|o| o.quantile).collect(),
            max_age: cfg.summary_max_age,
            age_buckets: cfg.summary_age_buckets,
            significant_figures: cfg.summary_significant_figures,
        }
    }
}

/// Labelled summary collector reporting quantiles over a sliding window.
///
/// Each label set keeps `age_buckets` HDR histograms. Every sample goes into
/// all of them; the oldest one answers quantile queries and is cleared every
/// `max_age / age_buckets`, so a sample counts for at most `max_age`. Sum
/// and count cover every sample since startup.
#[derive(Clone)]
pub struct SummaryVec {
    inner: Arc<SummaryVecCore>,
}

struct SummaryVecCore {
    desc: Desc,
    quantiles: Vec<f64>,
    sigfig: u8,
    streams: usize,
    stream_span: Duration,
    children: Mutex<HashMap<Vec<String>, SummaryState>>,
}

struct SummaryState {
    streams: Vec<Histogram<u64>>,
    /// Index of the oldest stream.
    head: usize,
    head_expires: Instant,
    sum: f64,
    count: u64,
}

impl SummaryState {
    /// Clears every stream that aged out before `now`.
    fn rotate(&mut self, now: Instant, span: Duration) {
        let streams = self.streams.len();
        if now >= self.head_expires + span * streams as u32 {
            // Idle for a whole window: nothing left is young enough.
            self.streams.iter_mut().for_each(|stream| stream.reset());
            self.head_expires = now + span;
            return;
        }

        while now >= self.head_expires {
            self.streams[self.head].reset();
            self.head = (self.head + 1) % streams;
            self.head_expires += span;
        }
    }
}

impl SummaryVec {
    pub fn new(opts: Opts, layout: &SummaryLayout) -> prometheus::Result<Self> {
        let desc = opts.describe()?;

        if layout.age_buckets == 0 || layout.max_age.is_zero() {
            return Err(prometheus::Error::Msg(
                "summary window needs a positive max age and at least one bucket".to_string(),
            ));
        }

        let mut quantiles = layout.quantiles.clone();
        quantiles.sort_by(f64::total_cmp);
        quantiles.dedup();

        Ok(Self {
            inner: Arc::new(SummaryVecCore {
                desc,
                quantiles,
                sigfig: layout.significant_figures,
                streams: layout.age_buckets as usize,
                stream_span: layout.max_age / layout.age_buckets,
                children: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Record `value` under the given label values, in declaration order.
    pub fn observe(&self, label_values: &[&str], value: f64) -> prometheus::Result<()> {
        self.observe_at(label_values, value, Instant::now())
    }

    fn observe_at(&self, label_values: &[&str], value: f64, now: Instant) -> prometheus::Result<()> {
        let expect = self.inner.desc.variable_labels.len();
        if label_values.len() != expect {
            return Err(prometheus::Error::InconsistentCardinality {
                expect,
                got: label_values.len(),
            });
        }

        let core = &self.inner;
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        let mut children = core.children.lock();
        let state = match children.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let streams = (0..core.streams)
                    .map(|_| Histogram::<u64>::new(core.sigfig))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| prometheus::Error::Msg(format!("creating histogram: {err}")))?;
                e.insert(SummaryState {
                    streams,
                    head: 0,
                    head_expires: now + core.stream_span,
                    sum: 0.0,
                    count: 0,
                })
            }
        };

        state.rotate(now, core.stream_span);
        let raw = scaled(value);
        for stream in &mut state.streams {
            stream.saturating_record(raw);
        }
        state.sum += value;
        state.count += 1;

        Ok(())
    }

    /// Sample count for one label set.
    pub fn sample_count(&self, label_values: &[&str]) -> u64 {
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        self.inner
            .children
            .lock()
            .get(&key)
            .map_or(0, |state| state.count)
    }

    fn collect_at(&self, now: Instant) -> MetricFamily {
        let core = &self.inner;
        let desc = &core.desc;

        let mut family = MetricFamily::default();
        family.set_name(desc.fq_name.clone());
        family.set_help(desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);

        let mut children = core.children.lock();
        let mut keys: Vec<Vec<String>> = children.keys().cloned().collect();
        keys.sort();

        for key in keys {
            let Some(state) = children.get_mut(&key) else {
                continue;
            };
            state.rotate(now, core.stream_span);

            let mut pairs: Vec<LabelPair> = desc
                .variable_labels
                .iter()
                .zip(&key)
                .map(|(name, value)| {
                    let mut pair = LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(value.clone());
                    pair
                })
                .collect();
            pairs.sort_by(|a, b| a.get_name().cmp(b.get_name()));

            let mut metric = Metric::default();
            for pair in pairs {
                metric.mut_label().push(pair);
            }

            let head = &state.streams[state.head];
            let mut summary = Summary::default();
            summary.set_sample_count(state.count);
            summary.set_sample_sum(state.sum);
            for &q in &core.quantiles {
                let value = if head.len() == 0 {
                    f64::NAN
                } else {
                    head.median_equivalent(head.value_at_quantile(q)) as f64 / SCALE
                };
                let mut quantile = Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(value);
                summary.mut_quantile().push(quantile);
            }
            metric.set_summary(summary);

            family.mut_metric().push(metric);
        }

        family
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        vec![self.collect_at(Instant::now())]
    }
}

/// Converts an observation to histogram units. Negative values clamp to zero.
fn scaled(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value * SCALE).round() as u64
}
