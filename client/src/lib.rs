//! # Arena Client Library
//!
//! Observer side of the arena shooter. The client holds no authority over
//! replicated state: it keeps an [`shared::ObserverView`] fed by the host's
//! ordered replication and turns local intent into requests for the host.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The observer router and view:
//! - Owner-only trigger pulls with local debounce
//! - Moves reported to the host as transform syncs
//! - In-order application of replicated calls
//!
//! ### Network Module (`network`)
//! A headless UDP client that connects, heartbeats, reports its starting
//! transform and optionally fires on a fixed cadence.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::network::BoxError> {
//!     let options = ClientOptions {
//!         fire_every: Some(Duration::from_millis(500)),
//!         ..ClientOptions::default()
//!     };
//!     let mut client = Client::new("127.0.0.1:8080", options).await?;
//!     client.run(Some(Duration::from_secs(10))).await
//! }
//! ```

pub mod network;
pub mod session;
