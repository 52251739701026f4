use crate::auth::AuthSecret;
use crate::handshake::client_handshake;
use crate::mux::{MuxConfig, Role, Session, VirtualStream};
use crate::relay::relay;
use crate::transport::TcpTransport;
use backhaul_common::config::ClientConfig;
use backhaul_common::{Result, TunnelError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client role: dials the server, authenticates, then relays every stream
/// the server opens to the local service.
pub struct TunnelClient {
    server_addr: String,
    local_addr: Arc<str>,
    secret: AuthSecret,
    mux_config: MuxConfig,
}

/// An authenticated tunnel that has not started relaying yet
#[derive(Debug)]
pub struct ConnectedTunnel {
    session: Session,
    gateway: String,
    local_addr: Arc<str>,
}

impl TunnelClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            server_addr: config.reverse_tunnel_addr.clone(),
            local_addr: Arc::from(config.local_service_addr.as_str()),
            secret: AuthSecret::new(&config.secret)?,
            mux_config: MuxConfig::default(),
        })
    }

    #[must_use]
    pub fn with_mux_config(mut self, config: MuxConfig) -> Self {
        self.mux_config = config;
        self
    }

    /// Dial the server and complete the handshake.
    ///
    /// A failed dial is fatal; a rejected secret surfaces as an
    /// authentication error once the server closes the control stream.
    pub async fn connect(&self) -> Result<ConnectedTunnel> {
        info!(server = %self.server_addr, "Connecting");
        let stream = TcpTransport::connect(&self.server_addr)
            .await
            .map_err(|e| TunnelError::Fatal(e.to_string()))?;

        // The dialing side receives streams
        let session = Session::new(stream, Role::Acceptor, self.mux_config.clone());

        match client_handshake(&session, &self.secret).await {
            Ok(gateway) => Ok(ConnectedTunnel {
                session,
                gateway,
                local_addr: Arc::clone(&self.local_addr),
            }),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Connect and relay until the session dies.
    pub async fn run(self) -> Result<()> {
        self.connect().await?.run().await
    }
}

impl ConnectedTunnel {
    /// `"<domain>:<port>"` announced by the server
    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Relay each accepted stream to the local service.
    ///
    /// Returns [`TunnelError::Fatal`] when the session ends; the client has
    /// no reconnect.
    pub async fn run(self) -> Result<()> {
        info!(gateway = %self.gateway, local = %self.local_addr, "Relaying to local service");
        loop {
            let stream = match self.session.accept_stream().await {
                Ok(stream) => stream,
                Err(e) => {
                    return Err(TunnelError::Fatal(format!("tunnel session ended: {e}")));
                }
            };
            let local_addr = Arc::clone(&self.local_addr);
            tokio::spawn(async move {
                relay_to_local(stream, &local_addr).await;
            });
        }
    }

    /// Close the session; `run` returns shortly after.
    pub async fn close(&self) {
        self.session.close().await;
    }
}

async fn relay_to_local(stream: VirtualStream, local_addr: &str) {
    let stream_id = stream.id();
    // A local dial failure only loses this stream
    let local = match TcpTransport::connect(local_addr).await {
        Ok(local) => local,
        Err(e) => {
            warn!(stream_id, "Dropping tunnel stream: {}", e);
            return;
        }
    };

    #[cfg(feature = "metrics")]
    backhaul_observability::metrics::relay_started();

    let stats = relay(stream, local).await;

    #[cfg(feature = "metrics")]
    backhaul_observability::metrics::relay_finished(stats.a_to_b, stats.b_to_a);

    debug!(
        stream_id,
        inbound = stats.a_to_b,
        outbound = stats.b_to_a,
        "Relay finished"
    );
}
