//! # Arena Host Library
//!
//! This library provides the authoritative host for the arena shooter. It owns
//! the canonical player state, resolves every shot, applies damage and deaths,
//! and replicates the results to all connected observers as ordered remote
//! calls.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Combat
//! Shots are resolved on the host only. Observers request a shot for a player
//! they own; the host raycasts, spawns the projectile, applies damage and
//! runs the death and respawn transition. Observers never mutate replicated
//! state themselves.
//!
//! ### Call Routing
//! Every remote call has a fixed discipline: host-validated, owner-only,
//! fan-out to all observers, or targeted at a single connection. The router
//! in `shared` enforces those rules; the [`session::HostSession`] provides
//! the handler bodies.
//!
//! ### Ordered Replication
//! Each connection has its own outgoing queue with sequence numbers, so every
//! observer applies replicated calls in the order the host issued them.
//!
//! ## Module Organization
//!
//! - `config`: tunables and scene data
//! - `registry`: player records (health, kills, deaths, owner)
//! - `scene`: entity bodies, ray queries and spawn points
//! - `scheduler`: tick-driven cancellable timers
//! - `combat`: damage, death and respawn
//! - `projectile`: firing, debounce and deferred despawn
//! - `session`: the host session wiring the above to the router
//! - `client_manager` and `network`: the UDP transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::network::BoxError> {
//!     let config = ServerConfig::default().with_tick_rate(30);
//!     let mut server = Server::new("127.0.0.1:8080", config).await?;
//!
//!     // Receives packets, ticks despawn timers and flushes replication
//!     // until shut down
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod combat;
pub mod config;
pub mod network;
pub mod projectile;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod session;
