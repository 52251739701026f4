//! backhaul command-line interface
//!
//! Exposes a TCP service behind NAT through a single outbound connection.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "backhaul",
    author,
    version,
    about = "Reverse TCP tunnel over a single outbound connection",
    long_about = "backhaul exposes a TCP service that has no inbound connectivity.\n\n\
                  Run `backhaul server` on a public host and `backhaul client` next to \
                  the private service; every connection to the gateway port the server \
                  announces is relayed to the service.",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server on a publicly reachable host
    Server(commands::server::ServerArgs),

    /// Run the tunnel client next to the private service
    Client(commands::client::ClientArgs),

    /// Print a freshly generated shared secret
    Secret,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => commands::server::run(args).await,
        Commands::Client(args) => commands::client::run(args).await,
        Commands::Secret => {
            commands::secret::run();
            Ok(())
        }
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["backhaul", "secret"]).unwrap();
        assert!(matches!(cli.command, Commands::Secret));

        let cli = Cli::try_parse_from(["backhaul", "server", "--control-port", "9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Server(_)));

        assert!(Cli::try_parse_from(["backhaul", "bogus"]).is_err());
    }
}
