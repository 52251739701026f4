//! Socket tuning for tunnel and relay connections
//!
//! - `TCP_NODELAY`: relayed bytes go out as soon as they arrive
//! - Larger buffers: one physical connection carries every logical stream
//! - TCP keepalive: a dead tunnel is noticed even with no traffic

use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const RECV_BUFFER_SIZE: usize = 1024 * 1024;
const SEND_BUFFER_SIZE: usize = 1024 * 1024;
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

pub fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let socket = SockRef::from(stream);

    socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Tuning is an optimisation; failures are logged and ignored.
pub fn configure_socket_silent(stream: &TcpStream) {
    if let Err(e) = configure_socket(stream) {
        debug!("Socket tuning failed: {}", e);
    }
}
