//! # Shooter Client Library
//!
//! Headless client for the shooter server. It speaks the same text protocol
//! as the graphical game client and keeps a local mirror of the world the
//! server describes.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Holds [`WorldMirror`], the client-side copy of the world:
//! - Local identity, learned from the first `JOIN` the server sends
//! - Positions and dead flags of every player
//! - Live bullets with their owners
//! - Latest scores and round winner
//!
//! Incremental packets patch the mirror; `SYNC` and `FULL_STATE` replace it,
//! so a client that missed datagrams converges at the next resync.
//!
//! ### Network Module (`network`)
//! [`network::BotClient`] joins a server, wanders with random position
//! updates, occasionally shoots, and reports the lethal hit and its death for enemy shots
//! it decides were on target. It leaves with `DISCONNECT` on Ctrl+C.
//!
//! ## Usage Example
//!
//! ```rust
//! use client::WorldMirror;
//! use shared::ServerPacket;
//!
//! let mut mirror = WorldMirror::new();
//! let packet = ServerPacket::decode("JOIN|127.0.0.1:50000_4821|120.5|80").unwrap();
//! mirror.apply(packet);
//!
//! assert_eq!(mirror.local_id.as_deref(), Some("127.0.0.1:50000_4821"));
//! ```

pub mod game;
pub mod network;

pub use game::{MirroredPlayer, WorldMirror};
