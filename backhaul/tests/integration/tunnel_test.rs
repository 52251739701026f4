//! End-to-end tunnel tests
//!
//! Handshake outcomes and a single relayed connection.

use super::{
    client_for, dead_addr, echo_roundtrip, gateway_addr, start_echo_server, start_server,
    OTHER_SECRET, SECRET,
};
use backhaul::TunnelError;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_handshake_announces_gateway() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;

    let mut client = client_for(control, echo, SECRET);
    let info = client.start().await.expect("Client failed to connect");

    let gateway = gateway_addr(&info);
    assert_eq!(gateway.ip().to_string(), "127.0.0.1");
    assert_ne!(gateway.port(), control.port());
    assert_eq!(info.gateway_port(), Some(gateway.port()));

    // The announced port is the one actually listening for this client
    let mut public = TcpStream::connect(gateway).await.unwrap();
    assert_eq!(echo_roundtrip(&mut public, b"hello").await, b"hello");

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_secret_gets_no_gateway() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;

    let mut intruder = client_for(control, echo, OTHER_SECRET);
    let err = intruder.start().await.unwrap_err();
    assert!(matches!(err, TunnelError::Authentication(_)), "{err}");
    assert!(!intruder.is_running());

    // The server keeps serving legitimate clients
    assert!(server.is_running());
    let mut client = client_for(control, echo, SECRET);
    let info = client.start().await.unwrap();
    let mut public = TcpStream::connect(gateway_addr(&info)).await.unwrap();
    assert_eq!(echo_roundtrip(&mut public, b"still here").await, b"still here");

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_each_client_gets_its_own_gateway() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;

    let mut first = client_for(control, echo, SECRET);
    let mut second = client_for(control, echo, SECRET);
    let a = first.start().await.unwrap();
    let b = second.start().await.unwrap();
    assert_ne!(a.gateway, b.gateway);

    for info in [&a, &b] {
        let mut public = TcpStream::connect(gateway_addr(info)).await.unwrap();
        assert_eq!(echo_roundtrip(&mut public, b"ping").await, b"ping");
    }

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_cannot_reach_server() {
    let echo = start_echo_server().await;
    let mut client = client_for(dead_addr().await, echo, SECRET);
    assert!(client.start().await.unwrap_err().is_fatal());
}
