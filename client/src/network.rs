use crate::game::WorldMirror;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientPacket, ServerPacket, MAX_DATAGRAM_SIZE, WORLD_HEIGHT, WORLD_WIDTH};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

const STEP_SIZE: f32 = 12.0;
const SHOOT_CHANCE: f64 = 0.1;
const HIT_CHANCE: f64 = 0.25;
const BULLET_DAMAGE: u32 = 20;
const MAX_HEALTH: i32 = 100;

/// Headless client that joins a server, wanders around and trades shots
pub struct BotClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    mirror: WorldMirror,
    rng: StdRng,
    health: i32,
    move_interval: Duration,
}

impl BotClient {
    pub async fn new(server_addr: SocketAddr) -> Result<Self, Box<dyn std::error::Error>> {
        let bind_addr: SocketAddr = if server_addr.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(BotClient {
            socket,
            server_addr,
            mirror: WorldMirror::new(),
            rng: StdRng::from_entropy(),
            health: MAX_HEALTH,
            move_interval: Duration::from_millis(100),
        })
    }

    pub fn mirror(&self) -> &WorldMirror {
        &self.mirror
    }

    async fn send_packet(&self, packet: &ClientPacket) -> Result<(), Box<dyn std::error::Error>> {
        self.socket
            .send_to(packet.encode().as_bytes(), self.server_addr)
            .await?;
        Ok(())
    }

    /// Applies a server packet and returns whatever the bot wants to say back
    fn handle_packet(&mut self, packet: ServerPacket) -> Vec<ClientPacket> {
        let mut replies = Vec::new();

        match &packet {
            ServerPacket::Shoot {
                player_id,
                bullet_id,
                ..
            } if Some(player_id) != self.mirror.local_id.as_ref() && self.is_alive() => {
                if self.rng.gen_bool(HIT_CHANCE) {
                    self.health -= BULLET_DAMAGE as i32;
                    debug!("Hit by {} ({} health left)", bullet_id, self.health);
                    // The server credits a kill per DAMAGE, so only the lethal hit is reported.
                    if self.health <= 0 {
                        info!("Killed by {}", player_id);
                        replies.push(ClientPacket::Damage {
                            bullet_id: bullet_id.clone(),
                            amount: BULLET_DAMAGE,
                        });
                        replies.push(ClientPacket::Death);
                    }
                }
            }
            ServerPacket::Respawn { player_id, .. }
                if Some(player_id) == self.mirror.local_id.as_ref() =>
            {
                info!("Respawned");
                self.health = MAX_HEALTH;
            }
            _ => {}
        }

        self.mirror.apply(packet);
        replies
    }

    fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Next wandering step, or a shot, for the local player
    fn next_action(&mut self) -> Option<ClientPacket> {
        let player_id = self.mirror.local_id.clone()?;
        let me = *self.mirror.local_player()?;
        if me.dead || !self.is_alive() {
            return None;
        }

        if self.rng.gen_bool(SHOOT_CHANCE) {
            let angle: f32 = self.rng.gen_range(0.0..std::f32::consts::TAU);
            return Some(ClientPacket::Shoot {
                dir_x: angle.cos(),
                dir_y: angle.sin(),
            });
        }

        let x = (me.x + self.rng.gen_range(-STEP_SIZE..=STEP_SIZE)).clamp(0.0, WORLD_WIDTH);
        let y = (me.y + self.rng.gen_range(-STEP_SIZE..=STEP_SIZE)).clamp(0.0, WORLD_HEIGHT);
        // POS is not echoed back, so keep the mirror current locally.
        self.mirror.apply(ServerPacket::Position {
            player_id: player_id.clone(),
            x,
            y,
        });
        Some(ClientPacket::Position { player_id, x, y })
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining {}", self.server_addr);
        self.send_packet(&ClientPacket::Join).await?;

        let mut move_interval = interval(self.move_interval);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match ServerPacket::from_datagram(&buffer[..len]) {
                            Ok(packet) => {
                                for reply in self.handle_packet(packet) {
                                    if let Err(e) = self.send_packet(&reply).await {
                                        error!("Error sending {}: {}", reply.kind(), e);
                                    }
                                }
                                if self.mirror.server_shut_down {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring malformed server message: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = move_interval.tick() => {
                    if let Some(action) = self.next_action() {
                        if let Err(e) = self.send_packet(&action).await {
                            error!("Error sending {}: {}", action.kind(), e);
                        }
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving the game");
                    break;
                }
            }
        }

        if self.mirror.local_id.is_some() && !self.mirror.server_shut_down {
            if let Err(e) = self.send_packet(&ClientPacket::Disconnect).await {
                warn!("Error sending DISCONNECT: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_bot() -> BotClient {
        let mut bot = BotClient::new("127.0.0.1:7777".parse().unwrap())
            .await
            .unwrap();
        bot.rng = StdRng::seed_from_u64(3);
        bot.handle_packet(ServerPacket::Join {
            player_id: "me".to_string(),
            x: 100.0,
            y: 100.0,
        });
        bot
    }

    fn enemy_shot(n: u32) -> ServerPacket {
        ServerPacket::Shoot {
            player_id: "enemy".to_string(),
            x: 0.0,
            y: 0.0,
            dir_x: 1.0,
            dir_y: 0.0,
            bullet_id: format!("enemy_{}", n),
        }
    }

    #[tokio::test]
    async fn test_no_action_before_join() {
        let mut bot = tokio_test::assert_ok!(BotClient::new("127.0.0.1:7777".parse().unwrap()).await);
        assert!(bot.next_action().is_none());
    }

    #[tokio::test]
    async fn test_actions_stay_in_world() {
        let mut bot = test_bot().await;

        for _ in 0..200 {
            match bot.next_action() {
                Some(ClientPacket::Position { player_id, x, y }) => {
                    assert_eq!(player_id, "me");
                    assert!((0.0..=WORLD_WIDTH).contains(&x));
                    assert!((0.0..=WORLD_HEIGHT).contains(&y));
                }
                Some(ClientPacket::Shoot { dir_x, dir_y }) => {
                    assert!(((dir_x * dir_x + dir_y * dir_y) - 1.0).abs() < 1e-3);
                }
                other => panic!("Unexpected action {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_own_shots_never_hurt() {
        let mut bot = test_bot().await;
        for n in 0..50 {
            let replies = bot.handle_packet(ServerPacket::Shoot {
                player_id: "me".to_string(),
                x: 0.0,
                y: 0.0,
                dir_x: 0.0,
                dir_y: 1.0,
                bullet_id: format!("me_{}", n),
            });
            assert!(replies.is_empty());
        }
        assert_eq!(bot.health, MAX_HEALTH);
    }

    #[tokio::test]
    async fn test_only_lethal_hit_is_reported() {
        let mut bot = test_bot().await;

        let mut damage = 0;
        let mut deaths = 0;
        for n in 0..400 {
            let replies = bot.handle_packet(enemy_shot(n));
            if !replies.is_empty() {
                assert!(bot.health <= 0);
                assert_eq!(
                    replies,
                    vec![
                        ClientPacket::Damage {
                            bullet_id: format!("enemy_{}", n),
                            amount: BULLET_DAMAGE,
                        },
                        ClientPacket::Death,
                    ]
                );
            }
            for reply in replies {
                match reply {
                    ClientPacket::Damage { .. } => damage += 1,
                    ClientPacket::Death => deaths += 1,
                    other => panic!("Unexpected reply {:?}", other),
                }
            }
        }

        assert_eq!(damage, 1);
        assert_eq!(deaths, 1);
        assert!(bot.next_action().is_none());

        bot.handle_packet(ServerPacket::Respawn {
            player_id: "me".to_string(),
            x: 50.0,
            y: 60.0,
        });
        assert_eq!(bot.health, MAX_HEALTH);
        assert!(bot.next_action().is_some());
    }
}
