//! Control-stream handshake
//!
//! The server (opener) opens the first logical stream; the client (acceptor)
//! writes its 36-byte secret on it. On a match the server binds a gateway
//! listener and answers with the 80-byte control message naming it.

use crate::auth::AuthSecret;
use crate::mux::Session;
use backhaul_common::{Result, TunnelError};
use backhaul_protocol::constants::{AUTH_SECRET_LEN, CONTROL_MESSAGE_LEN};
use backhaul_protocol::control::decode_gateway_address;
use backhaul_protocol::ControlMessage;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Read until `buf` is full or the peer closes; returns the bytes read.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Result of the server side of the handshake
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Authenticated; the gateway listener is bound and announced
    Active(Gateway),
    /// Wrong or missing secret; nothing was bound or sent
    Rejected,
}

/// Per-client gateway listener and the address announced for it
#[derive(Debug)]
pub struct Gateway {
    pub listener: TcpListener,
    pub message: ControlMessage,
}

/// Server-side handshake settings
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    secret: AuthSecret,
    bind_address: String,
    domain_name: String,
}

impl ServerHandshake {
    pub fn new(
        secret: AuthSecret,
        bind_address: impl Into<String>,
        domain_name: impl Into<String>,
    ) -> Self {
        Self {
            secret,
            bind_address: bind_address.into(),
            domain_name: domain_name.into(),
        }
    }

    /// Run the handshake on a freshly created opener session.
    ///
    /// On rejection the session is closed before returning.
    pub async fn run(&self, session: &Session) -> Result<HandshakeOutcome> {
        let mut control = session.open_stream().await?;

        let mut presented = [0u8; AUTH_SECRET_LEN];
        let n = read_full(&mut control, &mut presented).await?;

        if n < AUTH_SECRET_LEN || !self.secret.matches(&presented) {
            warn!(received = n, "Rejecting client: secret mismatch");
            let _ = control.shutdown().await;
            drop(control);
            session.close().await;
            return Ok(HandshakeOutcome::Rejected);
        }

        let listener = TcpListener::bind((self.bind_address.as_str(), 0)).await?;
        let port = listener.local_addr()?.port();
        let message = ControlMessage::new(self.domain_name.clone(), port);
        let encoded = message.encode()?;

        control.write_all(&encoded).await?;
        control.shutdown().await?;
        debug!(gateway = %message.gateway_address(), "Control message sent");

        Ok(HandshakeOutcome::Active(Gateway { listener, message }))
    }
}

/// Run the client side of the handshake; returns the announced gateway
/// address, which is only ever logged.
pub async fn client_handshake(session: &Session, secret: &AuthSecret) -> Result<String> {
    let mut control = session.accept_stream().await?;

    control.write_all(secret.as_bytes()).await?;
    debug!("Sent auth secret");

    let mut message = [0u8; CONTROL_MESSAGE_LEN];
    let n = read_full(&mut control, &mut message).await?;
    if n < CONTROL_MESSAGE_LEN {
        return Err(TunnelError::Authentication(format!(
            "control stream closed after {n} of {CONTROL_MESSAGE_LEN} bytes; secret rejected?"
        )));
    }

    let gateway = decode_gateway_address(&message)?.to_string();
    info!(gateway = %gateway, "Tunnel established");
    Ok(gateway)
}
