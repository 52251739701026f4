//! Logging and metrics for backhaul
//!
//! Library crates only emit `tracing` events and call the recording helpers
//! in [`metrics`]; binaries decide whether a subscriber and a Prometheus
//! recorder are installed.

pub mod logging;
pub mod metrics;

#[cfg(feature = "axum")]
pub mod server;

pub use logging::{init_logging, LogFormat};
pub use crate::metrics::setup_metrics_recorder;

#[cfg(feature = "axum")]
pub use server::start_metrics_server;
