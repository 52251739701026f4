//! TCP transport for the physical tunnel connection and public listeners

pub mod socket_tuning;
pub mod tcp;

pub use socket_tuning::{configure_socket, configure_socket_silent};
pub use tcp::TcpTransport;
