//! Server network layer handling UDP communications and game event orchestration

use crate::bullets::BulletLedger;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::respawn::RespawnScheduler;
use crate::scores::ScoreTracker;
use crate::session_registry::{Session, SessionRegistry};
use crate::utils::{player_id_for, unix_millis};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{ClientPacket, PlayerSnapshot, ServerDocument, ServerPacket, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Messages delivered to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: ClientPacket,
        addr: SocketAddr,
    },
    RespawnDue {
        player_id: String,
    },
    SessionTimeout {
        session: Session,
    },
    DeliverScores {
        player_id: String,
    },
    ResetRound,
    Shutdown,
}

/// Messages sent from the main loop to the sender task
///
/// Recipients are resolved when the message is queued, so every client sees
/// packets in the order the loop produced them.
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        payload: String,
        addr: SocketAddr,
    },
    BroadcastPacket {
        payload: String,
        targets: Vec<SocketAddr>,
    },
}

/// Cloneable handle for stopping a running server from another task
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    /// Requests a graceful shutdown. Returns false if the server is already gone.
    pub fn shutdown(&self) -> bool {
        self.server_tx.send(ServerMessage::Shutdown).is_ok()
    }
}

/// Authoritative server owning sessions, scores, bullets and respawns
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    sessions: Arc<RwLock<SessionRegistry>>,
    scores: ScoreTracker,
    bullets: BulletLedger,
    respawn: RespawnScheduler,
    rng: StdRng,
    round_over: bool,
    stopped: bool,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket: Arc::new(socket),
            sessions: Arc::new(RwLock::new(SessionRegistry::new())),
            scores: ScoreTracker::new(config.winning_score),
            bullets: BulletLedger::new(),
            respawn: RespawnScheduler::new(config.respawn_window),
            rng: StdRng::from_entropy(),
            round_over: false,
            stopped: false,
            tasks: Vec::new(),
            config,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match ClientPacket::from_datagram(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes the outgoing queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        self.tasks.push(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { payload, addr } => {
                        if let Err(e) = Self::send_datagram_impl(&socket, &payload, addr).await {
                            warn!("Failed to send to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { payload, targets } => {
                        for addr in targets {
                            if let Err(e) = Self::send_datagram_impl(&socket, &payload, addr).await
                            {
                                warn!("Failed to send to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that drops sessions which stopped sending
    fn spawn_timeout_checker(&mut self) {
        let timeout = self.config.session_timeout;
        if timeout.is_zero() {
            return;
        }

        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));

            loop {
                ticker.tick().await;

                let timed_out = {
                    let mut sessions = sessions.write().await;
                    sessions.check_timeouts(timeout)
                };

                for session in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::SessionTimeout { session }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        }));
    }

    async fn send_datagram_impl(
        socket: &UdpSocket,
        payload: &str,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        socket.send_to(payload.as_bytes(), addr).await?;
        Ok(())
    }

    fn encode(packet: &ServerPacket) -> Option<String> {
        match packet.encode().map_err(ServerError::from) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!("Dropping {:?}: {}", packet, e);
                None
            }
        }
    }

    fn send_packet(&self, packet: &ServerPacket, addr: SocketAddr) {
        let Some(payload) = Self::encode(packet) else {
            return;
        };
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { payload, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_packet_to_many(&self, packet: &ServerPacket, targets: Vec<SocketAddr>) {
        if targets.is_empty() {
            return;
        }
        let Some(payload) = Self::encode(packet) else {
            return;
        };
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { payload, targets })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Queues `packet` for every session except `exclude`
    async fn broadcast_packet(&self, packet: &ServerPacket, exclude: Option<&str>) {
        let targets = self.sessions.read().await.addrs_except(exclude);
        self.send_packet_to_many(packet, targets);
    }

    /// Posts `message` back to the main loop after `delay`
    fn defer(&self, delay: Duration, message: ServerMessage) {
        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if server_tx.send(message).is_err() {
                debug!("Server loop is gone, dropping deferred event");
            }
        });
    }

    fn scores_packet(&self) -> ServerPacket {
        ServerPacket::Document(ServerDocument::Scores {
            scores: self.scores.snapshot(),
            winner: self.scores.winner().map(str::to_owned),
        })
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::PacketReceived { packet, addr } => self.handle_packet(packet, addr).await,
            ServerMessage::RespawnDue { player_id } => self.handle_respawn_due(&player_id).await,
            ServerMessage::SessionTimeout { session } => {
                info!(
                    "Player {} timed out after {:?} of silence",
                    session.player_id, self.config.session_timeout
                );
                self.finish_departure(&session.player_id).await;
            }
            ServerMessage::DeliverScores { player_id } => {
                let addr = self.sessions.read().await.get(&player_id).map(|s| s.addr);
                if let Some(addr) = addr {
                    self.send_packet(&self.scores_packet(), addr);
                }
            }
            ServerMessage::ResetRound => self.reset_round().await,
            ServerMessage::Shutdown => self.shutdown().await,
        }
    }

    /// Routes a decoded client packet to its handler
    async fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        let kind = packet.kind();
        let known = self.sessions.write().await.touch(addr);

        match packet {
            ClientPacket::Join => self.handle_join(addr).await,
            _ if !known => debug!("Ignoring {} from unknown endpoint {}", kind, addr),
            ClientPacket::Position { player_id, x, y } => {
                self.handle_position(addr, player_id, x, y).await
            }
            ClientPacket::Shoot { dir_x, dir_y } => self.handle_shoot(addr, dir_x, dir_y).await,
            ClientPacket::Damage { bullet_id, amount } => {
                self.handle_damage(addr, bullet_id, amount).await
            }
            ClientPacket::Death => self.handle_death(addr).await,
            ClientPacket::Respawn => {
                debug!("Ignoring RESPAWN from {}, respawns are server scheduled", addr)
            }
            ClientPacket::Disconnect => self.handle_disconnect(addr).await,
        }
    }

    async fn handle_join(&mut self, addr: SocketAddr) {
        let existing = {
            let sessions = self.sessions.read().await;
            sessions
                .find_by_addr(addr)
                .map(|s| (s.player_id.clone(), s.x, s.y))
        };

        if let Some((player_id, x, y)) = existing {
            debug!("Repeated JOIN from {}, resending identity {}", addr, player_id);
            self.send_packet(
                &ServerPacket::Join {
                    player_id: player_id.clone(),
                    x,
                    y,
                },
                addr,
            );
            self.send_roster(&player_id, addr).await;
            return;
        }

        let (x, y) = self.config.map.random_spawn_point(&mut self.rng);
        let player_id = {
            let mut sessions = self.sessions.write().await;
            let mut player_id = player_id_for(addr, &mut self.rng);
            while sessions.contains(&player_id) {
                player_id = player_id_for(addr, &mut self.rng);
            }
            if !sessions.insert(Session::new(player_id.clone(), addr, x, y)) {
                warn!("Could not register {} for {}", player_id, addr);
            }
            player_id
        };
        self.scores.add_player(&player_id);

        // The joiner must learn its own id before anything else about the world.
        let joined = ServerPacket::Join {
            player_id: player_id.clone(),
            x,
            y,
        };
        self.send_packet(&joined, addr);
        self.send_roster(&player_id, addr).await;
        self.broadcast_packet(&joined, Some(&player_id)).await;
        self.broadcast_packet(&self.scores_packet(), Some(&player_id))
            .await;
        self.defer(
            self.config.join_scores_delay,
            ServerMessage::DeliverScores { player_id },
        );
    }

    /// Sends a `JOIN` for every other session to `addr`
    async fn send_roster(&self, player_id: &str, addr: SocketAddr) {
        let roster: Vec<ServerPacket> = {
            let sessions = self.sessions.read().await;
            sessions
                .snapshot()
                .into_iter()
                .filter(|s| s.player_id != player_id)
                .map(|s| ServerPacket::Join {
                    player_id: s.player_id,
                    x: s.x,
                    y: s.y,
                })
                .collect()
        };

        for packet in &roster {
            self.send_packet(packet, addr);
        }
    }

    async fn handle_position(&mut self, addr: SocketAddr, player_id: String, x: f32, y: f32) {
        let targets = {
            let mut sessions = self.sessions.write().await;
            if sessions.player_id_for(addr) != Some(player_id.as_str()) {
                debug!("Ignoring POS for {} from {}", player_id, addr);
                return;
            }
            sessions.set_position(&player_id, x, y);
            sessions.addrs_except(Some(&player_id))
        };

        self.send_packet_to_many(&ServerPacket::Position { player_id, x, y }, targets);
    }

    async fn handle_shoot(&mut self, addr: SocketAddr, dir_x: f32, dir_y: f32) {
        let shooter = {
            let sessions = self.sessions.read().await;
            sessions
                .find_by_addr(addr)
                .map(|s| (s.player_id.clone(), s.x, s.y))
        };
        let Some((player_id, x, y)) = shooter else {
            return;
        };

        let bullet_id = self.bullets.mint(&player_id, unix_millis());
        debug!("Player {} fired {}", player_id, bullet_id);

        let packet = ServerPacket::Shoot {
            player_id,
            x,
            y,
            dir_x,
            dir_y,
            bullet_id,
        };
        self.broadcast_packet(&packet, None).await;
    }

    /// Credits the owner of `bullet_id` with a kill
    async fn handle_damage(&mut self, addr: SocketAddr, bullet_id: String, amount: u32) {
        let Some(victim) = self
            .sessions
            .read()
            .await
            .player_id_for(addr)
            .map(str::to_owned)
        else {
            return;
        };

        let owner = match self.bullets.owner_of(&bullet_id) {
            Some(owner) => owner.to_string(),
            None => {
                debug!("DAMAGE from {} names unknown bullet {}", victim, bullet_id);
                return;
            }
        };
        if owner == victim {
            debug!("Ignoring self-inflicted damage from {}", victim);
            return;
        }

        self.bullets.claim(&bullet_id);
        match self.scores.add_kill(&owner) {
            Some(kills) => info!(
                "Player {} hit {} for {} damage, {} kills",
                owner, victim, amount, kills
            ),
            None => {
                debug!("Shooter {} is no longer connected", owner);
                return;
            }
        }

        self.broadcast_packet(&self.scores_packet(), None).await;
        self.check_for_winner().await;
    }

    async fn handle_death(&mut self, addr: SocketAddr) {
        let player_id = {
            let mut sessions = self.sessions.write().await;
            let Some(player_id) = sessions.player_id_for(addr).map(str::to_owned) else {
                return;
            };
            if !sessions.mark_dead(&player_id) {
                debug!("Player {} is already dead", player_id);
                return;
            }
            player_id
        };

        let delay = self.respawn.schedule(&player_id, &mut self.rng);
        info!(
            "Player {} died, respawning in {:.1}s",
            player_id,
            delay.as_secs_f32()
        );

        self.broadcast_packet(&ServerPacket::Death { player_id }, None)
            .await;
    }

    async fn handle_respawn_due(&mut self, player_id: &str) {
        let (x, y) = self.config.map.random_spawn_point(&mut self.rng);
        let respawned = self.sessions.write().await.respawn(player_id, x, y);
        if !respawned {
            debug!("Player {} left before respawning", player_id);
            return;
        }

        info!("Player {} respawned at ({:.1}, {:.1})", player_id, x, y);
        let packet = ServerPacket::Respawn {
            player_id: player_id.to_string(),
            x,
            y,
        };
        self.broadcast_packet(&packet, None).await;
    }

    async fn handle_disconnect(&mut self, addr: SocketAddr) {
        let removed = self.sessions.write().await.remove_by_addr(addr);
        if let Some(session) = removed {
            self.finish_departure(&session.player_id).await;
        }
    }

    /// Drops the score of a removed session and announces the departure
    async fn finish_departure(&mut self, player_id: &str) {
        self.scores.remove_player(player_id);

        let packet = ServerPacket::Disconnect {
            player_id: player_id.to_string(),
        };
        self.broadcast_packet(&packet, None).await;
        self.broadcast_packet(&self.scores_packet(), None).await;
    }

    /// Announces the round winner once and schedules the score reset
    async fn check_for_winner(&mut self) {
        if self.round_over {
            return;
        }
        let Some(winner) = self.scores.winner().map(str::to_owned) else {
            return;
        };

        self.round_over = true;
        info!(
            "Player {} wins the round, new round in {:?}",
            winner, self.config.round_reset_delay
        );

        let packet = ServerPacket::Document(ServerDocument::GameOver { winner });
        self.broadcast_packet(&packet, None).await;
        self.defer(self.config.round_reset_delay, ServerMessage::ResetRound);
    }

    async fn reset_round(&mut self) {
        self.scores.reset();
        for player_id in self.sessions.read().await.player_ids() {
            self.scores.add_player(&player_id);
        }
        self.round_over = false;
        info!("Scores reset for a new round");

        self.broadcast_packet(&self.scores_packet(), None).await;
    }

    /// Broadcasts every session's position and death flag plus live bullets
    async fn broadcast_full_state(&mut self) {
        let (players, targets) = {
            let sessions = self.sessions.read().await;
            if sessions.is_empty() {
                return;
            }
            (sessions.snapshot(), sessions.addrs())
        };

        let snapshots = players
            .iter()
            .map(|p| {
                (
                    p.player_id.clone(),
                    PlayerSnapshot {
                        x: p.x,
                        y: p.y,
                        is_dead: p.dead,
                    },
                )
            })
            .collect();
        let full_state = ServerPacket::Document(ServerDocument::FullState {
            players: snapshots,
            bullets: self.bullets.snapshot(),
        });

        debug!(
            "Full-state sync: {} players, {} bullets",
            players.len(),
            self.bullets.len()
        );
        self.send_packet_to_many(&ServerPacket::Sync { players }, targets.clone());
        self.send_packet_to_many(&full_state, targets);
    }

    fn sweep_bullets(&mut self) {
        let evicted = self.bullets.evict_older_than(self.config.bullet_ttl);
        if evicted > 0 {
            debug!("Evicted {} expired bullet records", evicted);
        }
    }

    /// Tells clients the server is going away and stops all background work
    async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Server shutting down");

        self.broadcast_packet(&ServerPacket::Shutdown, None).await;
        // Give the sender task a moment to flush the notice.
        sleep(self.config.shutdown_grace).await;

        self.respawn.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Server stopped");
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        if self.stopped {
            return Ok(());
        }

        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let server_tx = self.server_tx.clone();
        self.respawn
            .start(self.config.respawn_tick, move |ticket| {
                if let Err(e) = server_tx.send(ServerMessage::RespawnDue {
                    player_id: ticket.player_id,
                }) {
                    error!("Failed to deliver respawn event: {}", e);
                }
            });

        let mut sync_interval = interval(self.config.sync_interval);
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        sync_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => self.shutdown().await,
                    }
                    if self.stopped {
                        break;
                    }
                },

                _ = sync_interval.tick() => {
                    self.sweep_bullets();
                    self.broadcast_full_state().await;
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PlayerState;
    use std::collections::BTreeMap;
    use tokio::time::timeout;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn test_config(winning_score: u32) -> ServerConfig {
        ServerConfig {
            bind_addr: addr(0),
            winning_score,
            join_scores_delay: Duration::from_millis(10),
            round_reset_delay: Duration::from_millis(20),
            ..ServerConfig::default()
        }
    }

    async fn test_server(winning_score: u32) -> Server {
        Server::new(test_config(winning_score)).await.unwrap()
    }

    /// Queued packets as (recipients, decoded packet), in queue order
    fn drain(server: &mut Server) -> Vec<(Vec<SocketAddr>, ServerPacket)> {
        let mut queued = Vec::new();
        while let Ok(message) = server.game_rx.try_recv() {
            match message {
                GameMessage::SendPacket { payload, addr } => {
                    queued.push((vec![addr], ServerPacket::decode(&payload).unwrap()))
                }
                GameMessage::BroadcastPacket { payload, targets } => {
                    queued.push((targets, ServerPacket::decode(&payload).unwrap()))
                }
            }
        }
        queued
    }

    async fn receive(server: &mut Server, packet: ClientPacket, from: SocketAddr) {
        server
            .handle_message(ServerMessage::PacketReceived { packet, addr: from })
            .await;
    }

    async fn join(server: &mut Server, from: SocketAddr) -> String {
        receive(server, ClientPacket::Join, from).await;
        match drain(server).into_iter().next() {
            Some((targets, ServerPacket::Join { player_id, .. })) => {
                assert_eq!(targets, vec![from]);
                player_id
            }
            other => panic!("Expected own JOIN first, got {:?}", other),
        }
    }

    fn scores_of(packet: &ServerPacket) -> Option<(BTreeMap<String, u32>, Option<String>)> {
        match packet {
            ServerPacket::Document(ServerDocument::Scores { scores, winner }) => {
                Some((scores.clone(), winner.clone()))
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_join_assigns_identity_and_spawn() {
        let mut server = test_server(10).await;
        receive(&mut server, ClientPacket::Join, addr(9001)).await;

        let queued = drain(&mut server);
        match &queued[0] {
            (targets, ServerPacket::Join { player_id, x, y }) => {
                assert_eq!(targets, &vec![addr(9001)]);
                assert!(player_id.starts_with("127.0.0.1:9001_"));
                assert!(server.config.map.is_clear(*x, *y));
            }
            other => panic!("Unexpected first packet {:?}", other),
        }
        // Nobody else to notify yet.
        assert_eq!(queued.len(), 1);
        assert_eq!(server.scores.len(), 1);
    }

    #[tokio::test]
    async fn test_second_join_is_announced_in_order() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Join, addr(9002)).await;
        let queued = drain(&mut server);

        let b = match &queued[0] {
            (targets, ServerPacket::Join { player_id, .. }) => {
                assert_eq!(targets, &vec![addr(9002)]);
                player_id.clone()
            }
            other => panic!("Unexpected packet {:?}", other),
        };
        assert!(
            matches!(&queued[1], (t, ServerPacket::Join { player_id, .. }) if t == &vec![addr(9002)] && player_id == &a)
        );
        assert!(
            matches!(&queued[2], (t, ServerPacket::Join { player_id, .. }) if t == &vec![addr(9001)] && player_id == &b)
        );
        let (targets, scores) = &queued[3];
        assert_eq!(targets, &vec![addr(9001)]);
        let (scores, winner) = scores_of(scores).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(winner, None);
    }

    #[tokio::test]
    async fn test_joiner_gets_delayed_scores() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;

        let message = timeout(Duration::from_secs(1), server.server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&message, ServerMessage::DeliverScores { player_id } if player_id == &a));

        server.handle_message(message).await;
        let queued = drain(&mut server);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, vec![addr(9001)]);
        assert!(scores_of(&queued[0].1).is_some());
    }

    #[tokio::test]
    async fn test_repeated_join_keeps_identity() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Join, addr(9001)).await;
        let queued = drain(&mut server);

        assert!(matches!(&queued[0].1, ServerPacket::Join { player_id, .. } if player_id == &a));
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_position_is_relayed_to_others_only() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        join(&mut server, addr(9002)).await;
        drain(&mut server);

        let packet = ClientPacket::Position {
            player_id: a.clone(),
            x: 123.5,
            y: 456.0,
        };
        receive(&mut server, packet, addr(9001)).await;

        let queued = drain(&mut server);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, vec![addr(9002)]);
        assert_eq!(
            queued[0].1,
            ServerPacket::Position {
                player_id: a.clone(),
                x: 123.5,
                y: 456.0
            }
        );
        let sessions = server.sessions.read().await;
        let session = sessions.get(&a).unwrap();
        assert_eq!((session.x, session.y), (123.5, 456.0));
    }

    #[tokio::test]
    async fn test_spoofed_position_is_ignored() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        join(&mut server, addr(9002)).await;
        drain(&mut server);

        let packet = ClientPacket::Position {
            player_id: a.clone(),
            x: 1.0,
            y: 1.0,
        };
        receive(&mut server, packet, addr(9002)).await;

        assert!(drain(&mut server).is_empty());
        let sessions = server.sessions.read().await;
        assert_ne!(sessions.get(&a).unwrap().x, 1.0);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_ignored() {
        let mut server = test_server(10).await;
        join(&mut server, addr(9001)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Death, addr(9999)).await;
        receive(&mut server, ClientPacket::Shoot { dir_x: 1.0, dir_y: 0.0 }, addr(9999)).await;
        receive(&mut server, ClientPacket::Disconnect, addr(9999)).await;

        assert!(drain(&mut server).is_empty());
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shot_then_damage_credits_shooter() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        join(&mut server, addr(9002)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Shoot { dir_x: 1.0, dir_y: 0.0 }, addr(9001)).await;
        let queued = drain(&mut server);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0.len(), 2);
        let bullet_id = match &queued[0].1 {
            ServerPacket::Shoot {
                player_id,
                bullet_id,
                dir_x,
                ..
            } => {
                assert_eq!(player_id, &a);
                assert_eq!(*dir_x, 1.0);
                assert!(bullet_id.starts_with(&format!("{}_", a)));
                bullet_id.clone()
            }
            other => panic!("Unexpected packet {:?}", other),
        };

        let damage = ClientPacket::Damage {
            bullet_id: bullet_id.clone(),
            amount: 20,
        };
        receive(&mut server, damage.clone(), addr(9002)).await;

        let queued = drain(&mut server);
        let (scores, winner) = scores_of(&queued[0].1).unwrap();
        assert_eq!(scores[&a], 1);
        assert_eq!(winner, None);

        // The same bullet cannot be credited twice.
        receive(&mut server, damage, addr(9002)).await;
        assert!(drain(&mut server).is_empty());
        assert_eq!(server.scores.score(&a), Some(1));
    }

    #[tokio::test]
    async fn test_expired_bullet_credits_nobody() {
        let config = ServerConfig {
            bullet_ttl: Duration::ZERO,
            ..test_config(10)
        };
        let mut server = Server::new(config).await.unwrap();
        let a = join(&mut server, addr(9001)).await;
        join(&mut server, addr(9002)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Shoot { dir_x: 0.0, dir_y: 1.0 }, addr(9001)).await;
        let bullet_id = match drain(&mut server).pop() {
            Some((_, ServerPacket::Shoot { bullet_id, .. })) => bullet_id,
            other => panic!("Unexpected packet {:?}", other),
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        server.sweep_bullets();
        assert!(server.bullets.owner_of(&bullet_id).is_none());

        receive(
            &mut server,
            ClientPacket::Damage {
                bullet_id,
                amount: 20,
            },
            addr(9002),
        )
        .await;
        assert!(drain(&mut server).is_empty());
        assert_eq!(server.scores.score(&a), Some(0));
    }

    #[tokio::test]
    async fn test_self_damage_is_not_credited() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Shoot { dir_x: 0.0, dir_y: 1.0 }, addr(9001)).await;
        let bullet_id = match drain(&mut server).remove(0).1 {
            ServerPacket::Shoot { bullet_id, .. } => bullet_id,
            other => panic!("Unexpected packet {:?}", other),
        };

        receive(
            &mut server,
            ClientPacket::Damage {
                bullet_id,
                amount: 20,
            },
            addr(9001),
        )
        .await;

        assert!(drain(&mut server).is_empty());
        assert_eq!(server.scores.score(&a), Some(0));
    }

    #[tokio::test]
    async fn test_death_and_respawn_cycle() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Death, addr(9001)).await;
        let queued = drain(&mut server);
        assert_eq!(queued[0].1, ServerPacket::Death { player_id: a.clone() });
        assert!(!server.sessions.read().await.get(&a).unwrap().alive);
        // Deaths do not score.
        assert_eq!(server.scores.score(&a), Some(0));

        receive(&mut server, ClientPacket::Death, addr(9001)).await;
        assert!(drain(&mut server).is_empty());

        server
            .handle_message(ServerMessage::RespawnDue {
                player_id: a.clone(),
            })
            .await;
        let queued = drain(&mut server);
        match &queued[0].1 {
            ServerPacket::Respawn { player_id, x, y } => {
                assert_eq!(player_id, &a);
                assert!(server.config.map.is_clear(*x, *y));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        assert!(server.sessions.read().await.get(&a).unwrap().alive);
    }

    #[tokio::test]
    async fn test_respawn_for_departed_player_is_dropped() {
        let mut server = test_server(10).await;
        server
            .handle_message(ServerMessage::RespawnDue {
                player_id: "gone".to_string(),
            })
            .await;
        assert!(drain(&mut server).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_removes_session_and_score() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        let b = join(&mut server, addr(9002)).await;
        drain(&mut server);

        receive(&mut server, ClientPacket::Disconnect, addr(9002)).await;
        let queued = drain(&mut server);

        assert_eq!(queued[0].0, vec![addr(9001)]);
        assert_eq!(queued[0].1, ServerPacket::Disconnect { player_id: b.clone() });
        let (scores, _) = scores_of(&queued[1].1).unwrap();
        assert!(!scores.contains_key(&b));

        server.broadcast_full_state().await;
        let queued = drain(&mut server);
        match &queued[0].1 {
            ServerPacket::Sync { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].player_id, a);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        match &queued[1].1 {
            ServerPacket::Document(ServerDocument::FullState { players, .. }) => {
                assert!(players.contains_key(&a));
                assert!(!players.contains_key(&b));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_timeout_is_treated_as_disconnect() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        let b = join(&mut server, addr(9002)).await;
        drain(&mut server);

        // The checker task hands over sessions it has already removed.
        let session = server.sessions.write().await.remove(&a).unwrap();
        server
            .handle_message(ServerMessage::SessionTimeout { session })
            .await;

        let queued = drain(&mut server);
        assert_eq!(queued[0].0, vec![addr(9002)]);
        assert_eq!(queued[0].1, ServerPacket::Disconnect { player_id: a.clone() });
        let (scores, _) = scores_of(&queued[1].1).unwrap();
        assert!(!scores.contains_key(&a));
        assert!(scores.contains_key(&b));
        assert_eq!(server.scores.score(&a), None);
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_state_matches_registry() {
        let mut server = test_server(10).await;
        let a = join(&mut server, addr(9001)).await;
        let b = join(&mut server, addr(9002)).await;
        receive(
            &mut server,
            ClientPacket::Position {
                player_id: a.clone(),
                x: 10.0,
                y: 20.0,
            },
            addr(9001),
        )
        .await;
        receive(&mut server, ClientPacket::Death, addr(9002)).await;
        receive(&mut server, ClientPacket::Shoot { dir_x: 1.0, dir_y: 1.0 }, addr(9001)).await;
        drain(&mut server);

        server.broadcast_full_state().await;
        let queued = drain(&mut server);

        let expected: Vec<PlayerState> = server.sessions.read().await.snapshot();
        assert_eq!(queued[0].1, ServerPacket::Sync { players: expected });
        match &queued[1].1 {
            ServerPacket::Document(ServerDocument::FullState { players, bullets }) => {
                assert!(players[&b].is_dead);
                assert_eq!((players[&a].x, players[&a].y), (10.0, 20.0));
                assert_eq!(bullets.len(), 1);
                assert!(bullets.values().all(|owner| owner.owner_id == a));
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_state_skipped_without_players() {
        let mut server = test_server(10).await;
        server.broadcast_full_state().await;
        assert!(drain(&mut server).is_empty());
    }

    #[tokio::test]
    async fn test_win_announced_once_then_round_resets() {
        let mut server = test_server(2).await;
        let a = join(&mut server, addr(9001)).await;
        let b = join(&mut server, addr(9002)).await;
        drain(&mut server);

        let mut game_overs = 0;
        for _ in 0..3 {
            receive(&mut server, ClientPacket::Shoot { dir_x: 1.0, dir_y: 0.0 }, addr(9001)).await;
            let bullet_id = drain(&mut server)
                .into_iter()
                .find_map(|(_, p)| match p {
                    ServerPacket::Shoot { bullet_id, .. } => Some(bullet_id),
                    _ => None,
                })
                .unwrap();
            receive(
                &mut server,
                ClientPacket::Damage {
                    bullet_id,
                    amount: 20,
                },
                addr(9002),
            )
            .await;
            game_overs += drain(&mut server)
                .iter()
                .filter(|(_, p)| {
                    matches!(p, ServerPacket::Document(ServerDocument::GameOver { winner }) if winner == &a)
                })
                .count();
        }
        assert_eq!(game_overs, 1);
        assert_eq!(server.scores.winner(), Some(a.as_str()));

        // Deferred scores for both joins arrive first, then the reset.
        loop {
            let message = timeout(Duration::from_secs(1), server.server_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let is_reset = matches!(message, ServerMessage::ResetRound);
            server.handle_message(message).await;
            if is_reset {
                break;
            }
        }

        let queued = drain(&mut server);
        let (scores, winner) = scores_of(&queued.last().unwrap().1).unwrap();
        assert_eq!(winner, None);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[&a], 0);
        assert_eq!(scores[&b], 0);
        assert!(!server.scores.has_winner());
    }

    #[tokio::test]
    async fn test_handle_requests_shutdown() {
        let mut server = test_server(10).await;
        join(&mut server, addr(9001)).await;
        drain(&mut server);

        assert!(server.handle().shutdown());
        let message = server.server_rx.recv().await.unwrap();
        assert!(matches!(message, ServerMessage::Shutdown));

        server.handle_message(message).await;
        let queued = drain(&mut server);
        assert_eq!(queued, vec![(vec![addr(9001)], ServerPacket::Shutdown)]);
        assert!(!server.respawn.is_running());
        tokio_test::assert_ok!(server.run().await);
    }
}
