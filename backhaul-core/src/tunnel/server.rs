use crate::auth::AuthSecret;
use crate::governor::AcceptGovernor;
use crate::handshake::{HandshakeOutcome, ServerHandshake};
use crate::mux::{MuxConfig, Role, Session};
use crate::opener::{open_with_retry, RetryPolicy};
use crate::relay::relay;
use crate::transport::{configure_socket_silent, TcpTransport};
use backhaul_common::config::ServerConfig;
use backhaul_common::{Result, TunnelError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Server role: accepts client connections on the control port and gives
/// each authenticated client its own gateway listener.
pub struct TunnelServer {
    bind_address: String,
    control_port: u16,
    handshake: ServerHandshake,
    mux_config: MuxConfig,
    retry: RetryPolicy,
}

impl TunnelServer {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let secret = AuthSecret::new(&config.secret)?;
        Ok(Self {
            bind_address: config.bind_address.clone(),
            control_port: config.control_port,
            handshake: ServerHandshake::new(
                secret,
                config.bind_address.clone(),
                config.domain_name.clone(),
            ),
            mux_config: MuxConfig::default(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_mux_config(mut self, config: MuxConfig) -> Self {
        self.mux_config = config;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bind the control listener. Failure is fatal.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpTransport::bind(&self.bind_address, self.control_port).await
    }

    /// Bind and serve until a fatal error.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve clients on an already bound control listener.
    ///
    /// Returns only with a [`TunnelError::Fatal`] error: the control accept
    /// loop or any gateway accept loop gave up.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Control listener ready");

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<TunnelError>(1);
        let mut governor = AcceptGovernor::new("control");
        let this = Arc::new(self);

        loop {
            tokio::select! {
                Some(err) = fatal_rx.recv() => return Err(err),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = Arc::clone(&this);
                        let fatal_tx = fatal_tx.clone();
                        tokio::spawn(async move {
                            this.handle_client(stream, peer, fatal_tx).await;
                        });
                    }
                    Err(e) => governor.on_error(&e)?,
                },
            }
        }
    }

    async fn handle_client(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        fatal_tx: mpsc::Sender<TunnelError>,
    ) {
        configure_socket_silent(&stream);
        info!(peer = %peer, "Client connected");

        let session = Session::new(stream, Role::Opener, self.mux_config.clone());

        let gateway = match self.handshake.run(&session).await {
            Ok(HandshakeOutcome::Active(gateway)) => gateway,
            Ok(HandshakeOutcome::Rejected) => {
                #[cfg(feature = "metrics")]
                backhaul_observability::metrics::record_handshake_rejected();
                warn!(peer = %peer, "Client rejected");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, "Handshake failed: {}", e);
                session.close().await;
                return;
            }
        };

        let address = gateway.message.gateway_address();
        info!(peer = %peer, gateway = %address, "Tunnel active");

        #[cfg(feature = "metrics")]
        backhaul_observability::metrics::tunnel_opened();

        let result = run_gateway(&session, gateway.listener, self.retry).await;

        #[cfg(feature = "metrics")]
        backhaul_observability::metrics::tunnel_closed();

        session.close().await;
        match result {
            Ok(()) => info!(peer = %peer, gateway = %address, "Tunnel closed"),
            Err(e) if e.is_fatal() => {
                let _ = fatal_tx.send(e).await;
            }
            Err(e) => warn!(peer = %peer, gateway = %address, "Gateway failed: {}", e),
        }
    }
}

/// Accept public connections on `listener` and relay each one over a new
/// logical stream of `session`.
///
/// Ends when the session dies or when a stream cannot be opened after
/// retrying; the listener is dropped on return.
pub async fn run_gateway(
    session: &Session,
    listener: TcpListener,
    retry: RetryPolicy,
) -> Result<()> {
    // Capacity 1: the first failing connection stops the loop, later ones are ignored
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let mut governor = AcceptGovernor::new("gateway");

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                info!("Stopping gateway: tunnel streams unavailable");
                return Ok(());
            }
            () = session.closed() => {
                debug!("Session closed, releasing gateway");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((conn, remote)) => {
                    let session = session.clone();
                    let stop_tx = stop_tx.clone();
                    tokio::spawn(async move {
                        forward_connection(session, conn, remote, retry, stop_tx).await;
                    });
                }
                Err(e) => governor.on_error(&e)?,
            },
        }
    }
}

async fn forward_connection(
    session: Session,
    conn: TcpStream,
    remote: SocketAddr,
    retry: RetryPolicy,
    stop_tx: mpsc::Sender<()>,
) {
    configure_socket_silent(&conn);

    let stream = match open_with_retry(&session, retry).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(remote = %remote, "Could not open tunnel stream: {}", e);
            let _ = stop_tx.try_send(());
            return;
        }
    };

    let stream_id = stream.id();
    debug!(remote = %remote, stream_id, "Relaying public connection");

    #[cfg(feature = "metrics")]
    backhaul_observability::metrics::relay_started();

    let stats = relay(conn, stream).await;

    #[cfg(feature = "metrics")]
    backhaul_observability::metrics::relay_finished(stats.a_to_b, stats.b_to_a);

    debug!(
        remote = %remote,
        stream_id,
        inbound = stats.a_to_b,
        outbound = stats.b_to_a,
        "Relay finished"
    );
}
