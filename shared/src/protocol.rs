//! Encoding and decoding of every message kind exchanged over the UDP channel.
//!
//! Decoding happens once at the transport boundary and yields a closed enum;
//! anything that does not fit the expected shape becomes a [`ProtocolError`]
//! which callers log and drop. There is no error reply on the wire.

use crate::{FIELD_SEPARATOR, GROUP_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Reasons a datagram could not be turned into a packet.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty datagram")]
    Empty,

    #[error("datagram is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("{kind} expects {expected} fields, got {got}")]
    Arity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid number in field {field}: {value:?}")]
    BadNumber { field: &'static str, value: String },

    #[error("invalid dead flag {0:?}")]
    BadFlag(String),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Messages sent by clients to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Join,
    Position { player_id: String, x: f32, y: f32 },
    Shoot { dir_x: f32, dir_y: f32 },
    Damage { bullet_id: String, amount: u32 },
    Death,
    Respawn,
    Disconnect,
}

/// One player's entry in a `SYNC` broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    pub dead: bool,
}

/// Player entry of a `FULL_STATE` document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "isDead")]
    pub is_dead: bool,
}

/// Bullet entry of a `FULL_STATE` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletOwner {
    pub owner_id: String,
}

/// Structured server messages, serialized as JSON with a `"type"` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerDocument {
    #[serde(rename = "scores")]
    Scores {
        scores: BTreeMap<String, u32>,
        winner: Option<String>,
    },
    #[serde(rename = "gameOver")]
    GameOver { winner: String },
    #[serde(rename = "FULL_STATE")]
    FullState {
        players: BTreeMap<String, PlayerSnapshot>,
        bullets: BTreeMap<String, BulletOwner>,
    },
}

/// Messages sent by the server to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Join {
        player_id: String,
        x: f32,
        y: f32,
    },
    Position {
        player_id: String,
        x: f32,
        y: f32,
    },
    Shoot {
        player_id: String,
        x: f32,
        y: f32,
        dir_x: f32,
        dir_y: f32,
        bullet_id: String,
    },
    Death {
        player_id: String,
    },
    Respawn {
        player_id: String,
        x: f32,
        y: f32,
    },
    Disconnect {
        player_id: String,
    },
    Sync {
        players: Vec<PlayerState>,
    },
    Shutdown,
    Document(ServerDocument),
}

fn split_fields(text: &str) -> Result<Vec<&str>, ProtocolError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(text.split(FIELD_SEPARATOR).collect())
}

fn expect_arity(kind: &'static str, fields: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if fields.len() != expected {
        return Err(ProtocolError::Arity {
            kind,
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

fn parse_f32(field: &'static str, value: &str) -> Result<f32, ProtocolError> {
    match value.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ProtocolError::BadNumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, ProtocolError> {
    value.parse::<u32>().map_err(|_| ProtocolError::BadNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_flag(value: &str) -> Result<bool, ProtocolError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ProtocolError::BadFlag(other.to_string())),
    }
}

impl ClientPacket {
    pub fn from_datagram(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode(std::str::from_utf8(bytes)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let fields = split_fields(text)?;

        let packet = match fields[0] {
            "JOIN" => {
                expect_arity("JOIN", &fields, 1)?;
                ClientPacket::Join
            }
            "POS" => {
                expect_arity("POS", &fields, 4)?;
                ClientPacket::Position {
                    player_id: fields[1].to_string(),
                    x: parse_f32("x", fields[2])?,
                    y: parse_f32("y", fields[3])?,
                }
            }
            "SHOOT" => {
                expect_arity("SHOOT", &fields, 3)?;
                ClientPacket::Shoot {
                    dir_x: parse_f32("dirX", fields[1])?,
                    dir_y: parse_f32("dirY", fields[2])?,
                }
            }
            "DAMAGE" => {
                expect_arity("DAMAGE", &fields, 3)?;
                ClientPacket::Damage {
                    bullet_id: fields[1].to_string(),
                    amount: parse_u32("amount", fields[2])?,
                }
            }
            "DEATH" => {
                expect_arity("DEATH", &fields, 1)?;
                ClientPacket::Death
            }
            "RESPAWN" => {
                expect_arity("RESPAWN", &fields, 1)?;
                ClientPacket::Respawn
            }
            "DISCONNECT" => {
                expect_arity("DISCONNECT", &fields, 1)?;
                ClientPacket::Disconnect
            }
            other => return Err(ProtocolError::UnknownKind(other.to_string())),
        };

        Ok(packet)
    }

    pub fn encode(&self) -> String {
        match self {
            ClientPacket::Join => "JOIN".to_string(),
            ClientPacket::Position { player_id, x, y } => format!("POS|{}|{}|{}", player_id, x, y),
            ClientPacket::Shoot { dir_x, dir_y } => format!("SHOOT|{}|{}", dir_x, dir_y),
            ClientPacket::Damage { bullet_id, amount } => {
                format!("DAMAGE|{}|{}", bullet_id, amount)
            }
            ClientPacket::Death => "DEATH".to_string(),
            ClientPacket::Respawn => "RESPAWN".to_string(),
            ClientPacket::Disconnect => "DISCONNECT".to_string(),
        }
    }

    /// Message tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPacket::Join => "JOIN",
            ClientPacket::Position { .. } => "POS",
            ClientPacket::Shoot { .. } => "SHOOT",
            ClientPacket::Damage { .. } => "DAMAGE",
            ClientPacket::Death => "DEATH",
            ClientPacket::Respawn => "RESPAWN",
            ClientPacket::Disconnect => "DISCONNECT",
        }
    }
}

impl ServerPacket {
    pub fn from_datagram(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode(std::str::from_utf8(bytes)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            return Ok(ServerPacket::Document(serde_json::from_str(trimmed)?));
        }

        let fields = split_fields(trimmed)?;

        let packet = match fields[0] {
            "JOIN" => {
                expect_arity("JOIN", &fields, 4)?;
                ServerPacket::Join {
                    player_id: fields[1].to_string(),
                    x: parse_f32("x", fields[2])?,
                    y: parse_f32("y", fields[3])?,
                }
            }
            "POS" => {
                expect_arity("POS", &fields, 4)?;
                ServerPacket::Position {
                    player_id: fields[1].to_string(),
                    x: parse_f32("x", fields[2])?,
                    y: parse_f32("y", fields[3])?,
                }
            }
            "SHOOT" => {
                expect_arity("SHOOT", &fields, 7)?;
                ServerPacket::Shoot {
                    player_id: fields[1].to_string(),
                    x: parse_f32("x", fields[2])?,
                    y: parse_f32("y", fields[3])?,
                    dir_x: parse_f32("dirX", fields[4])?,
                    dir_y: parse_f32("dirY", fields[5])?,
                    bullet_id: fields[6].to_string(),
                }
            }
            "DEATH" => {
                expect_arity("DEATH", &fields, 2)?;
                ServerPacket::Death {
                    player_id: fields[1].to_string(),
                }
            }
            "RESPAWN" => {
                expect_arity("RESPAWN", &fields, 4)?;
                ServerPacket::Respawn {
                    player_id: fields[1].to_string(),
                    x: parse_f32("x", fields[2])?,
                    y: parse_f32("y", fields[3])?,
                }
            }
            "DISCONNECT" => {
                expect_arity("DISCONNECT", &fields, 2)?;
                ServerPacket::Disconnect {
                    player_id: fields[1].to_string(),
                }
            }
            "SYNC" => {
                let players = fields[1..]
                    .iter()
                    .map(|group| decode_player_state(group))
                    .collect::<Result<Vec<_>, _>>()?;
                ServerPacket::Sync { players }
            }
            "SHUTDOWN" => {
                expect_arity("SHUTDOWN", &fields, 1)?;
                ServerPacket::Shutdown
            }
            other => return Err(ProtocolError::UnknownKind(other.to_string())),
        };

        Ok(packet)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let text = match self {
            ServerPacket::Join { player_id, x, y } => format!("JOIN|{}|{}|{}", player_id, x, y),
            ServerPacket::Position { player_id, x, y } => {
                format!("POS|{}|{}|{}", player_id, x, y)
            }
            ServerPacket::Shoot {
                player_id,
                x,
                y,
                dir_x,
                dir_y,
                bullet_id,
            } => format!(
                "SHOOT|{}|{}|{}|{}|{}|{}",
                player_id, x, y, dir_x, dir_y, bullet_id
            ),
            ServerPacket::Death { player_id } => format!("DEATH|{}", player_id),
            ServerPacket::Respawn { player_id, x, y } => {
                format!("RESPAWN|{}|{}|{}", player_id, x, y)
            }
            ServerPacket::Disconnect { player_id } => format!("DISCONNECT|{}", player_id),
            ServerPacket::Sync { players } => {
                let mut text = String::from("SYNC");
                for player in players {
                    // Writing into a String cannot fail.
                    let _ = write!(
                        text,
                        "{}{}{}{}{}{}{}{}",
                        FIELD_SEPARATOR,
                        player.player_id,
                        GROUP_SEPARATOR,
                        player.x,
                        GROUP_SEPARATOR,
                        player.y,
                        GROUP_SEPARATOR,
                        player.dead
                    );
                }
                text
            }
            ServerPacket::Shutdown => "SHUTDOWN".to_string(),
            ServerPacket::Document(document) => serde_json::to_string(document)?,
        };

        Ok(text)
    }
}

fn decode_player_state(group: &str) -> Result<PlayerState, ProtocolError> {
    let parts: Vec<&str> = group.split(GROUP_SEPARATOR).collect();
    expect_arity("SYNC entry", &parts, 4)?;

    Ok(PlayerState {
        player_id: parts[0].to_string(),
        x: parse_f32("x", parts[1])?,
        y: parse_f32("y", parts[2])?,
        dead: parse_flag(parts[3])?,
    })
}
