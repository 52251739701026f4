//! Client subcommand implementation

use super::{shutdown_signal, ObservabilityArgs};
use anyhow::{Context, Result};
use backhaul_common::ClientConfig;
use backhaul_core::TunnelClient;
use backhaul_proxy::ForwardProxy;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// JSON configuration file; flags override its values
    #[arg(long, short = 'c', env = "BACKHAUL_CONFIG")]
    config: Option<PathBuf>,

    /// Tunnel server control address (host:port)
    #[arg(long, env = "BACKHAUL_SERVER")]
    server: Option<String>,

    /// Local service address to forward to (host:port)
    #[arg(long, env = "BACKHAUL_LOCAL_ADDR")]
    local_addr: Option<String>,

    /// Shared 36-character secret (see `backhaul secret`)
    #[arg(long, env = "BACKHAUL_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Also run an authenticated HTTP forward proxy on this port
    #[arg(long, env = "BACKHAUL_PROXY_PORT")]
    proxy_port: Option<u16>,

    #[command(flatten)]
    observability: ObservabilityArgs,
}

impl ClientArgs {
    /// Merge the config file (if any) with flag overrides and validate.
    fn resolve(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ClientConfig {
                reverse_tunnel_addr: String::new(),
                local_service_addr: String::new(),
                secret: String::new(),
                proxy_port: None,
            },
        };

        if let Some(server) = &self.server {
            config.reverse_tunnel_addr.clone_from(server);
        }
        if let Some(local_addr) = &self.local_addr {
            config.local_service_addr.clone_from(local_addr);
        }
        if let Some(secret) = &self.secret {
            config.secret.clone_from(secret);
        }
        if self.proxy_port.is_some() {
            config.proxy_port = self.proxy_port;
        }

        config.validate().context("invalid client configuration")?;
        Ok(config)
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    args.observability.init()?;
    let config = args.resolve()?;

    info!("Starting backhaul client v{}", env!("CARGO_PKG_VERSION"));

    // Bind before dialing so a taken port fails fast
    let proxy = match config.proxy_port {
        Some(port) => {
            let listener = ForwardProxy::bind(port)
                .await
                .context("proxy port unavailable")?;
            let proxy = ForwardProxy::with_generated_credentials();
            Some(tokio::spawn(proxy.serve(listener)))
        }
        None => None,
    };

    let client = TunnelClient::new(&config)?;
    let tunnel = client.connect().await.context("tunnel setup failed")?;
    info!(gateway = %tunnel.gateway(), "Tunnel established");

    tokio::select! {
        result = tunnel.run() => result.context("tunnel stopped"),
        result = proxy_task(proxy) => result,
        () = shutdown_signal() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Wait for the proxy task; pending forever when no proxy runs.
async fn proxy_task(
    proxy: Option<tokio::task::JoinHandle<backhaul_common::Result<()>>>,
) -> Result<()> {
    match proxy {
        Some(handle) => handle
            .await
            .context("proxy task panicked")?
            .context("proxy stopped"),
        None => std::future::pending().await,
    }
}
