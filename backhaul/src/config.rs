//! Configuration types for embedding backhaul.
//!
//! The builders fill in the same JSON-backed configuration structs the CLI
//! loads from disk.

pub use backhaul_common::config::{ClientConfig, ServerConfig};

/// Information about an established tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    /// `"<domain>:<port>"` announced by the server.
    ///
    /// Informational only; the client never routes on it.
    pub gateway: String,
}

impl TunnelInfo {
    /// Port of the gateway listener, if the announced address carries one.
    pub fn gateway_port(&self) -> Option<u16> {
        self.gateway
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}
