//! HTTP forward proxy run next to a backhaul client
//!
//! The proxy is a convenient route target: point the client's local
//! service address at it and every tunneled connection becomes a proxy
//! connection, gated by per-process basic credentials.

pub mod credentials;
pub mod proxy;

pub use credentials::{ProxyCredentials, REALM};
pub use proxy::{ForwardProxy, ProxyError};
