//! Huddle relay daemon — hosts the signaling rendezvous for a fleet of
//! peers. Peers only use it to find each other; session content flows
//! over direct channels and never touches this process.
//!
//! Bind address comes from the first argument, then `HUDDLE_RELAY_ADDR`,
//! then the library default.

use std::process::ExitCode;

use log::{error, info};

use huddle_peer::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let bind_addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HUDDLE_RELAY_ADDR").ok())
        .unwrap_or_else(|| RelayConfig::default().bind_addr);

    let config = RelayConfig {
        bind_addr,
        ..RelayConfig::default()
    };
    info!("Starting relay on {}", config.bind_addr);

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay terminated: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
