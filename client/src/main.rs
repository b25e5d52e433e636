use clap::Parser;
use client::network::BotClient;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server UDP port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let server_addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| format!("Could not resolve {}", args.host))?;

    info!("Starting bot client...");
    info!("Connecting to: {}", server_addr);

    let mut client = BotClient::new(server_addr).await?;
    client.run().await?;

    Ok(())
}
