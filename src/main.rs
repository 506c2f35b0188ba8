use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ortp_exporter::config::Config;
use ortp_exporter::export::{MetricsServer, PipelineHealth, Pusher, QualityMetrics};
use ortp_exporter::relay::RelayTable;
use ortp_exporter::scheduler::Scheduler;
use ortp_exporter::store::MongoStore;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Exports ortp relay latency and loss diagnostics as Prometheus metrics.
#[derive(Parser)]
#[command(name = "ortp-exporter", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Defaults to the config file's log_level.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("ortp-exporter {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting ortp-exporter",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = rt.block_on(run(cfg));
    if let Err(e) = &result {
        tracing::error!(error = ?e, "ortp-exporter failed");
    }
    result
}

async fn run(cfg: Config) -> Result<()> {
    let registry = Registry::new();
    let metrics =
        Arc::new(QualityMetrics::new(&registry, &cfg.relay).context("creating quality metrics")?);
    let health = PipelineHealth::new(&registry).context("creating health metrics")?;
    let relays = Arc::new(RelayTable::new(cfg.relay.nodes.clone()));

    tracing::info!(relays = relays.len(), "relay allow-list loaded");

    let cancel = CancellationToken::new();

    if cfg.output.prometheus {
        MetricsServer::new(registry.clone(), cfg.gateway.bind_addr())
            .start(cancel.child_token())
            .await
            .context("starting metrics server")?;
    }

    let store = MongoStore::connect(&cfg.store)
        .await
        .context("connecting to store")?;

    let mut scheduler = Scheduler::new(store, metrics, relays, &cfg).with_health(health);
    if cfg.output.push_gateway {
        let pusher = Pusher::new(&cfg.output, registry.clone()).context("creating pusher")?;
        tracing::info!(url = %pusher.url(), "pushing to gateway after every cycle");
        scheduler = scheduler.with_pusher(pusher);
    }

    let mut task = tokio::spawn(scheduler.run(cancel.child_token()));

    let finished = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            None
        }
        joined = &mut task => Some(joined),
    };

    let result = match finished {
        Some(joined) => joined.context("scheduler task panicked")?,
        None => {
            task.abort();
            Ok(())
        }
    };

    // Stops the scheduler, if still running, and the metrics server.
    cancel.cancel();

    tracing::info!("ortp-exporter stopped");

    result
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for SIGINT")?;
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}
