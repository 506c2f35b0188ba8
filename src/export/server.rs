use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Scrape endpoint for the shared registry.
pub struct MetricsServer {
    registry: Registry,
    addr: String,
}

impl MetricsServer {
    pub fn new(registry: Registry, addr: impl Into<String>) -> Self {
        Self {
            registry,
            addr: addr.into(),
        }
    }

    /// Binds the listener, then serves `/metrics` and `/healthz` in the
    /// background until `cancel` fires.
    ///
    /// Returns the bound address, so port 0 resolves to the real port.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("listening on {}", self.addr))?;
        let bound = listener
            .local_addr()
            .context("reading bound metrics address")?;

        let app = Router::new()
            .route("/metrics", get(scrape))
            .route("/healthz", get(healthz))
            .with_state(self.registry.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %bound, "serving metrics");

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;

            match served {
                Ok(()) => tracing::info!(addr = %bound, "metrics server stopped"),
                Err(e) => tracing::error!(error = %e, "metrics server failed"),
            }
        });

        Ok(bound)
    }
}

/// Encodes every registered collector in the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut out = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut out)
        .context("encoding metric families")?;
    String::from_utf8(out).context("exposition text is not UTF-8")
}

async fn scrape(State(registry): State<Registry>) -> Result<String, (StatusCode, String)> {
    encode_text(&registry).map_err(|e| {
        tracing::error!(error = %e, "scrape failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })
}

async fn healthz() -> &'static str {
    "ok"
}
