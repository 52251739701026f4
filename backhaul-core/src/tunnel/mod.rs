//! Server and client orchestrators

pub mod client;
pub mod server;

pub use client::{ConnectedTunnel, TunnelClient};
pub use server::{run_gateway, TunnelServer};
