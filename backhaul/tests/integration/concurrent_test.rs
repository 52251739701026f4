//! Many forwarded connections over one tunnel

use super::{client_for, echo_roundtrip, gateway_addr, start_echo_server, start_server, SECRET};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Payload unique to connection `id`, large enough to span several frames
fn payload(id: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + id * 7) % 251) as u8).collect()
}

#[tokio::test]
async fn test_concurrent_connections_keep_their_bytes_in_order() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, echo, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    let mut tasks = Vec::new();
    for id in 0..16 {
        tasks.push(tokio::spawn(async move {
            let expected = payload(id, 200 * 1024);
            let conn = TcpStream::connect(gateway).await.unwrap();
            let (mut r, mut w) = conn.into_split();

            let send = expected.clone();
            let writer = tokio::spawn(async move {
                for chunk in send.chunks(7_919) {
                    w.write_all(chunk).await.unwrap();
                }
                w
            });

            let mut received = vec![0u8; expected.len()];
            r.read_exact(&mut received).await.unwrap();
            let _w = writer.await.unwrap();
            assert!(received == expected, "connection {id} corrupted");
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closing_one_connection_leaves_others_intact() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, echo, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    let mut conns = Vec::new();
    for i in 0..8u8 {
        let mut conn = TcpStream::connect(gateway).await.unwrap();
        assert_eq!(echo_roundtrip(&mut conn, &[i; 32]).await, vec![i; 32]);
        conns.push(conn);
    }

    // Abruptly drop half of them
    let survivors: Vec<_> = conns
        .into_iter()
        .enumerate()
        .filter_map(|(i, conn)| (i % 2 == 1).then_some(conn))
        .collect();

    for (i, mut conn) in survivors.into_iter().enumerate() {
        let msg = format!("survivor-{i}");
        assert_eq!(echo_roundtrip(&mut conn, msg.as_bytes()).await, msg.as_bytes());
    }

    // New connections still work too
    let mut fresh = TcpStream::connect(gateway).await.unwrap();
    assert_eq!(echo_roundtrip(&mut fresh, b"fresh").await, b"fresh");

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_relay() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, echo, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    let mut conn = TcpStream::connect(gateway).await.unwrap();
    conn.write_all(b"last words").await.unwrap();

    let mut buf = [0u8; 10];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"last words");

    // Closing our side ends the relay; the tunnel side closes in turn
    conn.shutdown().await.unwrap();
    let mut rest = Vec::new();
    conn.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_that_never_reads_does_not_block_others() {
    let echo = start_echo_server().await;
    let (mut server, control) = start_server().await;
    let mut client = client_for(control, echo, SECRET);
    let gateway = gateway_addr(&client.start().await.unwrap());

    // Keeps sending while never reading the echo, until every buffer on the
    // path back to it is full
    let hog = TcpStream::connect(gateway).await.unwrap();
    let (_hog_read, mut hog_write) = hog.into_split();
    let flood = tokio::spawn(async move {
        let chunk = vec![0x5a_u8; 64 * 1024];
        while hog_write.write_all(&chunk).await.is_ok() {}
    });

    // Give the flood time to back up the relay
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!flood.is_finished());

    for i in 0..4u8 {
        let mut conn = TcpStream::connect(gateway).await.unwrap();
        let msg = vec![i; 4096];
        let echoed = timeout(Duration::from_secs(5), echo_roundtrip(&mut conn, &msg))
            .await
            .expect("connection stalled behind a non-reading peer");
        assert_eq!(echoed, msg);
    }

    flood.abort();
    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}
