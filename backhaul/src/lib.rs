//! # backhaul
//!
//! Expose a TCP service that has no inbound connectivity.
//!
//! The private side dials a public server once; the server then announces a
//! per-client gateway port, and every connection accepted there is carried
//! back over that single connection as its own logical stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backhaul::{Client, Server};
//!
//! # async fn example() -> backhaul::Result<()> {
//! let secret = "d12a1f29-065d-4d65-addf-fefa51ff019b";
//!
//! let mut server = Server::builder()
//!     .bind_address("0.0.0.0")
//!     .control_port(7835)
//!     .domain_name("tunnel.example.com")
//!     .secret(secret)
//!     .build()?;
//! server.start().await?;
//!
//! let mut client = Client::builder()
//!     .server_addr("tunnel.example.com:7835")
//!     .local_addr("127.0.0.1:8080")
//!     .secret(secret)
//!     .build()?;
//! let info = client.start().await?;
//! println!("Public gateway: {}", info.gateway);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - multiplexer frames and the fixed-width control message
//! - [`common`] - errors, JSON configuration and defaults
//! - [`tunnel`] - multiplexer, handshake, retrying opener, relay and the two roles
//!
//! [`Server`] and [`Client`] wrap the roles with start/shutdown handles.

pub mod client;
pub mod config;
pub mod server;

// Re-export subcrates
pub use backhaul_common as common;
pub use backhaul_core as tunnel;
pub use backhaul_protocol as protocol;

pub use client::{Client, ClientBuilder};
pub use config::TunnelInfo;
pub use server::{Server, ServerBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::common::{Result, TunnelError};
    pub use crate::tunnel::{AuthSecret, MuxConfig, RetryPolicy};
    pub use crate::protocol::ControlMessage;
    pub use crate::{Client, Server, TunnelInfo};
}

// Convenience re-exports at crate root
pub use common::{Result, TunnelError};
