//! Prometheus metrics
//!
//! Recording goes through the `metrics` facade; nothing is stored until a
//! recorder is installed with [`setup_metrics_recorder`].

use backhaul_common::{Result, TunnelError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus exporter and return the handle.
/// This handle is used to retrieve the current metrics state as a string.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|e| TunnelError::Config(e.to_string()))?;
    Ok(handle)
}

/// A client passed the handshake and got a gateway listener.
pub fn tunnel_opened() {
    metrics::counter!("backhaul_tunnels_total").increment(1);
    metrics::gauge!("backhaul_active_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    metrics::gauge!("backhaul_active_tunnels").decrement(1.0);
}

pub fn record_handshake_rejected() {
    metrics::counter!("backhaul_handshake_rejections_total").increment(1);
}

pub fn relay_started() {
    metrics::gauge!("backhaul_active_relays").increment(1.0);
}

/// `inbound` is what the connection's originator sent, `outbound` the reply.
pub fn relay_finished(inbound: u64, outbound: u64) {
    metrics::gauge!("backhaul_active_relays").decrement(1.0);
    metrics::counter!("backhaul_relayed_bytes_total", "direction" => "inbound").increment(inbound);
    metrics::counter!("backhaul_relayed_bytes_total", "direction" => "outbound")
        .increment(outbound);
}

pub fn record_stream_open_retry() {
    metrics::counter!("backhaul_stream_open_retries_total").increment(1);
}

pub fn record_accept_error(listener: &'static str) {
    metrics::counter!("backhaul_accept_errors_total", "listener" => listener).increment(1);
}
