//! Republishes ortp call-quality diagnostics stored in MongoDB as
//! Prometheus relay latency and loss metrics.

pub mod config;
pub mod diagnostic;
pub mod export;
pub mod pipeline;
pub mod relay;
pub mod scheduler;
pub mod store;
