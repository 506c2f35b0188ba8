//! Metric collectors and the two ways they leave the process.

pub mod health;
pub mod metrics;
pub mod push;
pub mod server;
pub mod summary;

pub use health::PipelineHealth;
pub use metrics::QualityMetrics;
pub use push::Pusher;
pub use server::MetricsServer;
pub use summary::SummaryVec;
