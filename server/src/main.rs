use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::DEFAULT_PORT;

/// Main-method of the application.
/// Parses command-line arguments, then runs the relay until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Path that accepts websocket upgrades
        #[clap(long, env = "RELAY_PATH", default_value = "/")]
        path: String,
        /// Maximum number of simultaneous connections
        #[clap(long, env = "MAX_CONNECTIONS", default_value = "1024")]
        max_connections: usize,
        /// Messages queued per connection before delivery to it is skipped
        #[clap(long, env = "OUTBOUND_BUFFER", default_value = "256")]
        outbound_buffer: usize,
        /// Default log filter, overridden by RUST_LOG
        #[clap(long, default_value = "info")]
        log_level: String,
    }

    // Parse command line arguments
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        path: args.path,
        max_connections: args.max_connections,
        outbound_buffer: args.outbound_buffer,
    };

    let mut server = Server::new(&config).await?;

    // Handle shutdown gracefully
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
