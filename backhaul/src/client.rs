//! Embeddable tunnel client with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use backhaul::Client;
//!
//! # async fn example() -> backhaul::Result<()> {
//! let mut client = Client::builder()
//!     .server_addr("tunnel.example.com:7835")
//!     .local_addr("127.0.0.1:8080")
//!     .secret("d12a1f29-065d-4d65-addf-fefa51ff019b")
//!     .build()?;
//!
//! let info = client.start().await?;
//! println!("Connected! Gateway: {}", info.gateway);
//! # Ok(())
//! # }
//! ```

use crate::config::{ClientConfig, TunnelInfo};
use backhaul_common::constants::DEFAULT_LOCAL_ADDR;
use backhaul_common::{Result, TunnelError};
use backhaul_core::{MuxConfig, TunnelClient};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A tunnel client that can be embedded in your application.
///
/// Use [`Client::builder()`] to create a new client with the builder pattern.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    mux_config: MuxConfig,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<()>>>,
}

/// Builder for constructing a [`Client`] with ergonomic configuration.
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    mux_config: MuxConfig,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig {
                reverse_tunnel_addr: String::new(),
                local_service_addr: DEFAULT_LOCAL_ADDR.to_string(),
                secret: String::new(),
                proxy_port: None,
            },
            mux_config: MuxConfig::default(),
        }
    }
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Connect, authenticate and start relaying in the background.
    ///
    /// Returns once the server has announced the gateway. The client has no
    /// reconnect: when the session ends the background task finishes with
    /// [`TunnelError::Fatal`], observable through [`wait()`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns an error if the client is already running, a
    /// [`TunnelError::Fatal`] if the server cannot be dialed, or an
    /// authentication error if the server rejects the secret.
    pub async fn start(&mut self) -> Result<TunnelInfo> {
        if self.task.is_some() {
            return Err(TunnelError::InvalidState("client already started".into()));
        }

        let client = TunnelClient::new(&self.config)?.with_mux_config(self.mux_config.clone());
        let tunnel = client.connect().await?;
        let info = TunnelInfo {
            gateway: tunnel.gateway().to_string(),
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let session = tunnel.session().clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                result = tunnel.run() => {
                    if let Err(e) = &result {
                        error!("Tunnel stopped: {}", e);
                    }
                    result
                }
                _ = shutdown_rx.changed() => {
                    info!("Client shutdown requested");
                    session.close().await;
                    Ok(())
                }
            }
        });
        self.task = Some(task);

        Ok(info)
    }

    /// Wait until the tunnel stops.
    pub async fn wait(&mut self) -> Result<()> {
        // The handle stays in place if this future is dropped early
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| TunnelError::Fatal(format!("client task panicked: {e}")))?
    }

    /// Close the tunnel and wait for the background task to complete.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    /// Signal the client to stop (non-blocking).
    ///
    /// Use [`shutdown()`](Self::shutdown) if you need to wait for cleanup.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Check if the client is currently running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best-effort signal shutdown on drop
        self.stop();
    }
}

impl ClientBuilder {
    /// Start from a loaded configuration file.
    #[must_use]
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            mux_config: MuxConfig::default(),
        }
    }

    /// Set the server control address (host:port).
    #[must_use]
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.reverse_tunnel_addr = addr.into();
        self
    }

    /// Set the local service every tunneled connection is relayed to.
    ///
    /// Default: `127.0.0.1:8080`
    #[must_use]
    pub fn local_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.local_service_addr = addr.into();
        self
    }

    /// Set the shared 36-character secret.
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

    /// Build the client with the configured options.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the server address is missing or the
    /// secret is not exactly 36 printable ASCII characters.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        Ok(Client {
            config: self.config,
            mux_config: self.mux_config,
            shutdown_tx: None,
            task: None,
        })
    }
}
