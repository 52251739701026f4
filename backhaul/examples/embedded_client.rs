//! Example: Embedded backhaul client
//!
//! This example shows how to embed the backhaul client in your application.
//!
//! # Usage
//!
//! ```bash
//! # Start a local HTTP server on port 8000 (e.g., with Python)
//! python3 -m http.server 8000
//!
//! # Run this example
//! cargo run --example embedded_client -- \
//!     --server tunnel.example.com:7835 \
//!     --secret d12a1f29-065d-4d65-addf-fefa51ff019b \
//!     --local-addr 127.0.0.1:8000
//! ```

use backhaul::Client;
use std::env;

#[tokio::main]
async fn main() -> backhaul::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info,backhaul_core=debug")
        .init();

    // Parse command line arguments (simple parsing for example)
    let args: Vec<String> = env::args().collect();

    let server_addr = get_arg(&args, "--server").unwrap_or_else(|| "localhost:7835".to_string());
    let secret = get_arg(&args, "--secret").unwrap_or_default();
    let local_addr = get_arg(&args, "--local-addr").unwrap_or_else(|| "127.0.0.1:8000".to_string());

    println!("backhaul Embedded Client Example");
    println!("================================");
    println!("Server:     {server_addr}");
    println!("Local addr: {local_addr}");
    println!();

    // Build and start the client using the builder pattern
    let mut client = Client::builder()
        .server_addr(&server_addr)
        .secret(&secret)
        .local_addr(&local_addr)
        .build()?;

    println!("Connecting to server...");

    let info = client.start().await?;
    println!("Connected! Public gateway: {}", info.gateway);

    println!();
    println!("Press Ctrl+C to stop");

    let interrupted = tokio::select! {
        result = client.wait() => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        println!("\nShutting down...");
        client.shutdown().await?;
    }

    Ok(())
}

fn get_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}
