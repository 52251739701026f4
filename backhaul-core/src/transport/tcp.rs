//! Plain TCP transport

use super::socket_tuning::configure_socket_silent;
use backhaul_common::{Result, TunnelError};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub struct TcpTransport;

impl TcpTransport {
    /// Bind a listener; `port` 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            TunnelError::Fatal(format!("Failed to listen on {host}:{port}: {e}"))
        })?;
        debug!(addr = %listener.local_addr()?, "Listening");
        Ok(listener)
    }

    /// Dial `addr` (`host:port`) and apply socket tuning.
    pub async fn connect(addr: &str) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TunnelError::Connection(format!("Failed to connect to {addr}: {e}")))?;
        configure_socket_silent(&stream);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_and_connect() {
        let listener = TcpTransport::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = TcpTransport::connect(&addr.to_string()).await.unwrap();
        assert!(stream.nodelay().unwrap());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let listener = TcpTransport::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::connect(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Connection(_)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let listener = TcpTransport::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = TcpTransport::bind("127.0.0.1", port).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
