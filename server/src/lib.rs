//! # Shooter Server Library
//!
//! This library provides the authoritative relay server for a top-down
//! multiplayer shooter played over UDP. Clients simulate their own movement
//! and combat; the server owns identity, scoring, death and respawn timing,
//! and keeps every client's view of the world converging.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Each UDP endpoint that sends `JOIN` becomes a session with a minted player
//! id of the form `<ip>:<port>_<4 digits>` and a spawn point away from the
//! map's roads. Sessions leave on `DISCONNECT` or after a period of silence.
//!
//! ### Event Relay
//! Position reports are forwarded to every other player, shots are stamped
//! with a bullet id and echoed to everyone, and deaths are announced and
//! queued for a delayed respawn.
//!
//! ### Scoring
//! Hits reported through `DAMAGE` credit the bullet's owner with a kill. The
//! first player to reach the winning score ends the round; scores reset a few
//! seconds later.
//!
//! ### Resynchronization
//! Once per sync interval the server broadcasts a compact `SYNC` line and a
//! JSON `FULL_STATE` document so that clients which dropped datagrams recover.
//!
//! ## Module Organization
//!
//! - `network`: UDP tasks and the main event loop
//! - `session_registry`: endpoint to player mapping and live player state
//! - `scores`: kill counts and the round winner
//! - `bullets`: bullet ownership used to attribute hits
//! - `respawn`: FIFO respawn timing on its own task
//! - `spawn`: map layout and road-avoiding spawn sampling
//! - `config`: tunables and their validation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!
//!     // Stop on Ctrl+C; clients receive SHUTDOWN first
//!     let handle = server.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bullets;
pub mod config;
pub mod error;
pub mod network;
pub mod respawn;
pub mod scores;
pub mod session_registry;
pub mod spawn;
pub mod utils;
