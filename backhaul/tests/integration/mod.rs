#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for backhaul
//!
//! Real server and client over loopback TCP, with an echo service standing
//! in for the private service.

mod concurrent_test;
mod error_test;
mod tunnel_test;

use backhaul::{Client, Server, TunnelInfo};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

pub const SECRET: &str = "d12a1f29-065d-4d65-addf-fefa51ff019b";
pub const OTHER_SECRET: &str = "6f1c0b8e-3d4a-4c2b-9e7f-0a1b2c3d4e5f";

/// Server on an ephemeral loopback control port, announcing `127.0.0.1`
pub async fn start_server() -> (Server, SocketAddr) {
    let mut server = Server::builder()
        .bind_address("127.0.0.1")
        .control_port(0)
        .domain_name("127.0.0.1")
        .secret(SECRET)
        .build()
        .expect("Failed to build server");
    let addr = server.start().await.expect("Failed to start server");
    (server, addr)
}

pub fn client_for(server_addr: SocketAddr, local_addr: SocketAddr, secret: &str) -> Client {
    Client::builder()
        .server_addr(server_addr.to_string())
        .local_addr(local_addr.to_string())
        .secret(secret)
        .build()
        .expect("Failed to build client")
}

/// Gateway address from the announcement
pub fn gateway_addr(info: &TunnelInfo) -> SocketAddr {
    info.gateway.parse().expect("gateway is not host:port")
}

/// Start a TCP service that echoes every byte back
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// An address nothing listens on
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Write `payload` and read back exactly as many bytes
pub async fn echo_roundtrip(conn: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    conn.read_exact(&mut buf).await.unwrap();
    buf
}

/// Poll until `addr` refuses connections
pub async fn wait_until_closed(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).await.is_err() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}
