//! Server subcommand implementation

use super::{shutdown_signal, ObservabilityArgs};
use anyhow::{Context, Result};
use backhaul_common::ServerConfig;
use backhaul_core::TunnelServer;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// JSON configuration file; flags override its values
    #[arg(long, short = 'c', env = "BACKHAUL_CONFIG")]
    config: Option<PathBuf>,

    /// Interface for the control port and every gateway listener
    #[arg(long, env = "BACKHAUL_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Port clients dial
    #[arg(long, env = "BACKHAUL_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Domain announced to clients in the gateway address
    #[arg(long, env = "BACKHAUL_DOMAIN_NAME")]
    domain_name: Option<String>,

    /// Shared 36-character secret (see `backhaul secret`)
    #[arg(long, env = "BACKHAUL_SECRET", hide_env_values = true)]
    secret: Option<String>,

    #[command(flatten)]
    observability: ObservabilityArgs,
}

impl ServerArgs {
    /// Merge the config file (if any) with flag overrides and validate.
    fn resolve(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind_address) = &self.bind_address {
            config.bind_address.clone_from(bind_address);
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(domain_name) = &self.domain_name {
            config.domain_name.clone_from(domain_name);
        }
        if let Some(secret) = &self.secret {
            config.secret.clone_from(secret);
        }

        config.validate().context("invalid server configuration")?;
        Ok(config)
    }
}

pub async fn run(args: ServerArgs) -> Result<()> {
    args.observability.init()?;
    let config = args.resolve()?;

    info!("Starting backhaul server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        bind = %config.bind_address,
        port = config.control_port,
        domain = %config.domain_name,
        "Server configuration"
    );

    let server = TunnelServer::new(&config)?;
    let listener = server.bind().await.context("control port unavailable")?;

    tokio::select! {
        result = server.serve(listener) => result.context("server stopped"),
        () = shutdown_signal() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
