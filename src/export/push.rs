use anyhow::{bail, Context, Result};
use prometheus::Registry;
use reqwest::Url;

use super::server::encode_text;
use crate::config::OutputConfig;

/// Job label under which every push is grouped.
pub const PUSH_JOB: &str = "rt";

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Sends registry snapshots to a Pushgateway.
pub struct Pusher {
    http: reqwest::Client,
    url: Url,
    registry: Registry,
}

impl Pusher {
    pub fn new(cfg: &OutputConfig, registry: Registry) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.push_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: push_url(&cfg.push_gateway_addr, &cfg.monitor_id)?,
            registry,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Replaces this monitor's metric group with the current registry.
    pub async fn push(&self) -> Result<()> {
        let body = encode_text(&self.registry)?;

        let response = self
            .http
            .put(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, TEXT_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .with_context(|| format!("pushing to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status, self.url, body);
        }

        Ok(())
    }
}

/// Builds `{addr}/metrics/job/rt/monitorID/{monitor_id}`.
///
/// Addresses without a scheme are treated as plain HTTP. The monitor id is
/// percent-encoded as a single path segment.
pub fn push_url(addr: &str, monitor_id: &str) -> Result<Url> {
    let base = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };

    let mut url = Url::parse(&base).with_context(|| format!("parsing push address {addr}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("push address {addr} cannot carry a path"))?
        .pop_if_empty()
        .extend(["metrics", "job", PUSH_JOB, "monitorID", monitor_id]);

    Ok(url)
}
