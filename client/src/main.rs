use clap::Parser;
use client::network::{BoxError, Client, ClientOptions};
use log::info;
use shared::Vec3;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Starting position as x,y,z
    #[arg(short = 'p', long, default_value = "0,0,0", allow_hyphen_values = true)]
    position: Vec3,

    /// Facing and shot direction as x,y,z
    #[arg(short = 'a', long, default_value = "0,0,1", allow_hyphen_values = true)]
    aim: Vec3,

    /// Pull the trigger every N milliseconds
    #[arg(short = 'f', long)]
    fire_every_ms: Option<u64>,

    /// Disconnect after N seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let options = ClientOptions {
        position: args.position,
        aim: args.aim,
        fire_every: args
            .fire_every_ms
            .map(|ms| Duration::from_millis(ms.max(1))),
        ..ClientOptions::default()
    };

    let mut client = Client::new(&args.server, options).await?;
    client.run(args.duration.map(Duration::from_secs)).await
}
