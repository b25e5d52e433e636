use clap::Parser;
use log::{error, info};
use server::config::{RespawnWindow, ServerConfig};
use server::network::Server;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Shortest respawn delay in seconds
    #[arg(long, default_value = "20")]
    respawn_min: u64,

    /// Longest respawn delay in seconds
    #[arg(long, default_value = "30")]
    respawn_max: u64,

    /// Full-state resync interval in milliseconds
    #[arg(long, default_value = "1000")]
    sync_ms: u64,

    /// Seconds of silence before a player is dropped (0 disables)
    #[arg(long, default_value = "60")]
    session_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: SocketAddr::new(args.host, args.port),
        respawn_window: RespawnWindow::new(
            Duration::from_secs(args.respawn_min),
            Duration::from_secs(args.respawn_max),
        ),
        sync_interval: Duration::from_millis(args.sync_ms),
        session_timeout: Duration::from_secs(args.session_timeout),
        ..ServerConfig::default()
    };

    info!("Starting server on {}", config.bind_addr);
    info!(
        "Respawn window {:?}..{:?}, first to {} kills wins",
        config.respawn_window.min, config.respawn_window.max, config.winning_score
    );

    let mut server = Server::new(config).await?;

    let handle = server.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;

    Ok(())
}
