use clap::Parser;
use log::{error, info};
use server::{HubConfig, Iris, Relay};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of players
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Shared secret clients must present. Any non-empty token is accepted when unset
    #[arg(long)]
    token: Option<String>,

    /// Longest chat message accepted, in bytes
    #[arg(long, default_value_t = shared::DEFAULT_MAX_MESSAGE_LEN)]
    max_message_len: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = HubConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        auth_token: args.token,
        max_message_len: args.max_message_len,
        client_timeout: Duration::from_secs(args.timeout),
        state_flush_interval: Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64),
        ..HubConfig::default()
    };

    info!("Starting Iris on {}", config.bind_addr);
    info!("Tick rate: {}Hz, max clients: {}", args.tick_rate, config.max_clients);

    let mut iris = Iris::bind(config).await?;
    let handle = iris.handle();
    let relay = Relay::new(iris.handle(), args.tick_rate).spawn()?;

    let hub = tokio::spawn(async move { iris.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    handle.shutdown();

    match hub.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Hub stopped with error: {}", e),
        Err(e) => error!("Hub task panicked: {}", e),
    }

    if relay.join().is_err() {
        error!("Relay thread panicked");
    }

    let stats = handle.diagnostics();
    info!(
        "Served {} packets, {} broadcasts, {} malformed dropped",
        stats.packets_received, stats.broadcasts, stats.decode_errors
    );

    Ok(())
}
