use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Token presented during authentication
    #[arg(short = 't', long, default_value = "guest")]
    token: String,

    /// State records sent per second
    #[arg(short = 'r', long, default_value = "20")]
    rate: u32,

    /// Size of each state record in bytes
    #[arg(long, default_value = "16")]
    record_len: usize,

    /// Chat line to send periodically
    #[arg(short = 'c', long)]
    chat: Option<String>,

    /// Seconds between chat lines
    #[arg(long, default_value = "2")]
    chat_every: u64,

    /// Stop after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let config = ClientConfig {
        server: args.server,
        token: args.token,
        send_rate: args.rate,
        record_len: args.record_len,
        chat: args.chat,
        chat_interval: Duration::from_secs(args.chat_every.max(1)),
        duration: args.duration.map(Duration::from_secs),
    };

    let mut client = Client::new(config).await?;
    let stats = client.run().await?;

    info!(
        "Sent {} states, received {} snapshots and {} messages",
        stats.states_sent, stats.snapshots, stats.messages
    );

    Ok(())
}
