//! Common errors, configuration and defaults for backhaul

pub mod config;
pub mod constants;
pub mod error;

pub use config::{validate_secret, ClientConfig, ServerConfig};
pub use constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_CONTROL_PORT, DEFAULT_DOMAIN_NAME, DEFAULT_LOCAL_ADDR,
};
pub use error::{MuxError, Result, TunnelError};
