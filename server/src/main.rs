use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::{BoxError, Server};
use server::scene::Aabb;
use shared::Vec3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Respawn point as x,y,z (repeatable, replaces the defaults)
    #[arg(long = "spawn", allow_hyphen_values = true)]
    spawns: Vec<Vec3>,

    /// Blocking wall as x,y,z:x,y,z corners (repeatable)
    #[arg(long = "wall", value_parser = parse_wall, allow_hyphen_values = true)]
    walls: Vec<Aabb>,

    /// Seed for respawn selection
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_wall(s: &str) -> Result<Aabb, String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected x,y,z:x,y,z but got '{}'", s))?;
    Ok(Aabb::new(a.parse()?, b.parse()?))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let args = Args::parse();

    let mut config = ServerConfig {
        max_clients: args.max_clients,
        walls: args.walls,
        seed: args.seed,
        ..ServerConfig::default()
    }
    .with_tick_rate(args.tick_rate);
    if !args.spawns.is_empty() {
        config.spawn_points = args.spawns;
    }

    info!(
        "Starting server: {} Hz, {} clients max, {} spawn points, {} walls",
        args.tick_rate,
        config.max_clients,
        config.spawn_points.len(),
        config.walls.len()
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wall() {
        let wall = parse_wall("1,0,5:-1,2,6").unwrap();
        assert_eq!(wall.min, Vec3::new(-1.0, 0.0, 5.0));
        assert_eq!(wall.max, Vec3::new(1.0, 2.0, 6.0));
        assert!(parse_wall("1,0,5").is_err());
    }

    #[test]
    fn test_args_collect_repeated_spawns() {
        let args = Args::try_parse_from([
            "server", "--spawn", "1,0,1", "--spawn", "-1,0,-1", "--seed", "3",
        ])
        .unwrap();
        assert_eq!(args.spawns.len(), 2);
        assert_eq!(args.seed, Some(3));
        assert!(args.walls.is_empty());
    }
}
