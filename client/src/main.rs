use clap::Parser;
use client::network::Client;
use log::info;
use rand::Rng;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay websocket URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000/")]
    server: String,

    /// Player id to join as (random when omitted)
    #[arg(short = 'p', long)]
    player_id: Option<String>,

    /// Delay before reconnecting after the connection drops, in milliseconds
    #[arg(short = 'r', long, default_value = "1000")]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    // Player "0" is reserved for the system
    let player_id = args
        .player_id
        .unwrap_or_else(|| rand::thread_rng().gen_range(1..u32::MAX).to_string());

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Joining as player {}", player_id);

    let mut client = Client::new(
        &args.server,
        player_id,
        Duration::from_millis(args.reconnect_delay_ms),
    );

    client.run().await?;

    Ok(())
}
