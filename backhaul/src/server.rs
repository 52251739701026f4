//! Embeddable tunnel server with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use backhaul::Server;
//!
//! # async fn example() -> backhaul::Result<()> {
//! let mut server = Server::builder()
//!     .control_port(7835)
//!     .domain_name("tunnel.example.com")
//!     .secret("d12a1f29-065d-4d65-addf-fefa51ff019b")
//!     .build()?;
//!
//! let addr = server.start().await?;
//! println!("Control port: {addr}");
//! server.wait().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ServerConfig;
use backhaul_common::{Result, TunnelError};
use backhaul_core::{MuxConfig, RetryPolicy, TunnelServer};
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// A tunnel server that can be embedded in your application.
///
/// Use [`Server::builder()`] to create a new server with the builder pattern.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    mux_config: MuxConfig,
    retry: RetryPolicy,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<()>>>,
}

/// Builder for constructing a [`Server`] with ergonomic configuration.
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    mux_config: MuxConfig,
    retry: RetryPolicy,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Bind the control port and start accepting clients in the background.
    ///
    /// Returns the bound control address (useful with port `0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the server is already running, or a
    /// [`TunnelError::Fatal`] if the control port cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.task.is_some() {
            return Err(TunnelError::InvalidState("server already started".into()));
        }

        let server = TunnelServer::new(&self.config)?
            .with_mux_config(self.mux_config.clone())
            .with_retry_policy(self.retry);
        let listener = server.bind().await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(addr);

        info!(addr = %addr, domain = %self.config.domain_name, "Starting backhaul server");

        let task = tokio::spawn(async move {
            tokio::select! {
                result = server.serve(listener) => result,
                _ = shutdown_rx.changed() => {
                    info!("Server shutdown requested");
                    Ok(())
                }
            }
        });
        self.task = Some(task);

        Ok(addr)
    }

    /// Wait until the server stops.
    ///
    /// Resolves with [`TunnelError::Fatal`] when an accept loop gave up, or
    /// `Ok(())` after [`stop()`](Self::stop).
    pub async fn wait(&mut self) -> Result<()> {
        // The handle stays in place if this future is dropped early
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| TunnelError::Fatal(format!("server task panicked: {e}")))?
    }

    /// Stop accepting clients and wait for the accept loop to exit.
    ///
    /// Tunnels that are already active keep running until their client
    /// disconnects.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    /// Signal the server to stop (non-blocking).
    ///
    /// Use [`shutdown()`](Self::shutdown) if you need to wait for cleanup.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Check if the server is currently running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Bound control address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Best-effort signal shutdown on drop
        self.stop();
    }
}

impl ServerBuilder {
    /// Start from a loaded configuration file.
    #[must_use]
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Interface for the control port and gateway listeners.
    ///
    /// Default: `0.0.0.0`
    #[must_use]
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    /// Port clients dial; `0` picks an ephemeral port.
    ///
    /// Default: `7835`
    #[must_use]
    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    /// Domain announced to clients in the gateway address.
    ///
    /// Default: `localhost`
    #[must_use]
    pub fn domain_name(mut self, domain: impl Into<String>) -> Self {
        self.config.domain_name = domain.into();
        self
    }

    /// Set the shared 36-character secret clients must present.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.config.secret = secret.into();
        self
    }

    #[must_use]
    pub fn mux_config(mut self, config: MuxConfig) -> Self {
        self.mux_config = config;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the server with the configured options.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret is not exactly 36
    /// printable ASCII characters or the domain cannot fit the control
    /// message.
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;
        Ok(Server {
            config: self.config,
            mux_config: self.mux_config,
            retry: self.retry,
            local_addr: None,
            shutdown_tx: None,
            task: None,
        })
    }
}
