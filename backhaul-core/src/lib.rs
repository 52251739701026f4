//! Core of the backhaul reverse tunnel
//!
//! The client dials out to the server once; the server then becomes the
//! side that opens logical streams over that connection, one per public
//! connection accepted on the client's gateway listener.

pub mod auth;
pub mod governor;
pub mod handshake;
pub mod mux;
pub mod opener;
pub mod relay;
pub mod resource_limits;
pub mod transport;
pub mod tunnel;

// Re-export specific items for convenience
pub use auth::AuthSecret;
pub use mux::{MuxConfig, Role, Session, VirtualStream};
pub use opener::RetryPolicy;
pub use tunnel::client::TunnelClient;
pub use tunnel::server::TunnelServer;
