use log::{debug, info};
use shared::{PlayerState, ServerDocument, ServerPacket};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirroredPlayer {
    pub x: f32,
    pub y: f32,
    pub dead: bool,
}

/// Client-side copy of the world as announced by the server
///
/// Incremental packets (`JOIN`, `POS`, `DEATH`, ...) patch the copy; `SYNC`
/// and `FULL_STATE` replace it wholesale so lost datagrams heal at the next
/// resync.
#[derive(Debug, Clone, Default)]
pub struct WorldMirror {
    pub local_id: Option<String>,
    pub players: HashMap<String, MirroredPlayer>,
    /// Bullet id to owner id
    pub bullets: BTreeMap<String, String>,
    pub scores: BTreeMap<String, u32>,
    pub winner: Option<String>,
    pub server_shut_down: bool,
}

impl WorldMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Join { player_id, x, y } => {
                // The server always names the joiner first.
                if self.local_id.is_none() {
                    info!("Joined as {}", player_id);
                    self.local_id = Some(player_id.clone());
                }
                self.players
                    .insert(player_id, MirroredPlayer { x, y, dead: false });
            }

            ServerPacket::Position { player_id, x, y } => {
                let player = self
                    .players
                    .entry(player_id)
                    .or_insert(MirroredPlayer { x, y, dead: false });
                player.x = x;
                player.y = y;
            }

            ServerPacket::Shoot {
                player_id,
                bullet_id,
                ..
            } => {
                self.bullets.insert(bullet_id, player_id);
            }

            ServerPacket::Death { player_id } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.dead = true;
                }
            }

            ServerPacket::Respawn { player_id, x, y } => {
                self.players
                    .insert(player_id, MirroredPlayer { x, y, dead: false });
            }

            ServerPacket::Disconnect { player_id } => {
                self.players.remove(&player_id);
                self.scores.remove(&player_id);
            }

            ServerPacket::Sync { players } => {
                self.players = players
                    .into_iter()
                    .map(|p| {
                        (
                            p.player_id,
                            MirroredPlayer {
                                x: p.x,
                                y: p.y,
                                dead: p.dead,
                            },
                        )
                    })
                    .collect();
            }

            ServerPacket::Shutdown => {
                info!("Server is shutting down");
                self.server_shut_down = true;
            }

            ServerPacket::Document(document) => self.apply_document(document),
        }
    }

    fn apply_document(&mut self, document: ServerDocument) {
        match document {
            ServerDocument::Scores { scores, winner } => {
                debug!("Scores updated: {:?}", scores);
                self.scores = scores;
                self.winner = winner;
            }
            ServerDocument::GameOver { winner } => {
                info!("Game over, {} wins", winner);
                self.winner = Some(winner);
            }
            ServerDocument::FullState { players, bullets } => {
                self.players = players
                    .into_iter()
                    .map(|(id, p)| {
                        (
                            id,
                            MirroredPlayer {
                                x: p.x,
                                y: p.y,
                                dead: p.is_dead,
                            },
                        )
                    })
                    .collect();
                self.bullets = bullets
                    .into_iter()
                    .map(|(id, owner)| (id, owner.owner_id))
                    .collect();
            }
        }
    }

    pub fn local_player(&self) -> Option<&MirroredPlayer> {
        self.local_id.as_ref().and_then(|id| self.players.get(id))
    }

    /// Mirrored players in the same order the server lists them in `SYNC`
    pub fn snapshot(&self) -> Vec<PlayerState> {
        let mut states: Vec<PlayerState> = self
            .players
            .iter()
            .map(|(id, p)| PlayerState {
                player_id: id.clone(),
                x: p.x,
                y: p.y,
                dead: p.dead,
            })
            .collect();
        states.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        states
    }
}
