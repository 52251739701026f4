//! Failure isolation and teardown

use super::{
    client_for, dead_addr, echo_roundtrip, gateway_addr, start_echo_server, start_server,
    wait_until_closed, SECRET,
};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_local_service_down_only_drops_that_connection() {
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, dead_addr().await, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    for _ in 0..3 {
        let mut public = TcpStream::connect(gateway).await.unwrap();
        let mut buf = Vec::new();
        let n = public.read_to_end(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    // Neither role gave up
    assert!(client.is_running());
    assert!(server.is_running());

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_gateway_closes_when_client_leaves() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, echo, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    let mut public = TcpStream::connect(gateway).await.unwrap();
    assert_eq!(echo_roundtrip(&mut public, b"before").await, b"before");

    client.shutdown().await.unwrap();
    assert!(
        wait_until_closed(gateway, Duration::from_secs(5)).await,
        "gateway listener outlived its session"
    );

    // In-flight connections are torn down with the session
    let mut rest = Vec::new();
    let n = public.read_to_end(&mut rest).await.unwrap_or(0);
    assert_eq!(n, 0);

    assert!(server.is_running());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_fails_fatally_when_server_disappears() {
    let echo = start_echo_server().await;

    // Stand-in server that authenticates the client and then dies
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control = listener.local_addr().unwrap();
    let fake = tokio::spawn(async move {
        use backhaul::tunnel::handshake::{HandshakeOutcome, ServerHandshake};
        use backhaul::tunnel::{AuthSecret, MuxConfig, Role, Session};

        let (stream, _) = listener.accept().await.unwrap();
        let session = Session::new(stream, Role::Opener, MuxConfig::default());
        let handshake =
            ServerHandshake::new(AuthSecret::new(SECRET).unwrap(), "127.0.0.1", "127.0.0.1");
        let outcome = handshake.run(&session).await.unwrap();
        assert!(matches!(outcome, HandshakeOutcome::Active(_)));
        session.close().await;
    });

    let mut client = client_for(control, echo, SECRET);
    client.start().await.unwrap();
    fake.await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), client.wait())
        .await
        .expect("client did not notice the dead session")
        .unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_server_shutdown_closes_control_port() {
    let (mut server, control) = start_server().await;
    assert!(TcpStream::connect(control).await.is_ok());

    server.shutdown().await.unwrap();
    assert!(!server.is_running());
    assert!(wait_until_closed(control, Duration::from_secs(5)).await);
}
