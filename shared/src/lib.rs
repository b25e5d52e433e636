//! Wire protocol and world constants shared by the shooter server and its clients.
//!
//! Every datagram carries exactly one UTF-8 message. Game events use a flat,
//! `|`-delimited format (`POS|playerId|x|y`); messages that carry per-player
//! maps (`scores`, `gameOver`, `FULL_STATE`) are JSON documents tagged by a
//! `"type"` field.

pub mod protocol;

pub use protocol::{
    BulletOwner, ClientPacket, PlayerSnapshot, PlayerState, ProtocolError, ServerDocument,
    ServerPacket,
};

pub const DEFAULT_PORT: u16 = 7777;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
/// Minimum distance a spawn point keeps from every road centerline.
pub const ROAD_MARGIN: f32 = 50.0;
pub const WINNING_SCORE: u32 = 10;

pub const FIELD_SEPARATOR: char = '|';
pub const GROUP_SEPARATOR: char = ',';

/// Largest datagram either side expects to read.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
