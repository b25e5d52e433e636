//! Session tracking for connected players
//!
//! This module maps UDP endpoints to server-assigned player identities and
//! holds each player's live state:
//! - Identity and return address for every connected client
//! - Last reported position and the alive/dead flag
//! - Activity timestamps for liveness timeouts
//!
//! The registry is the source of truth for who receives broadcasts and for the
//! contents of the periodic full-state resync.

use log::info;
use shared::PlayerState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Server-side record of one connected player
#[derive(Debug, Clone)]
pub struct Session {
    /// Identity minted at join time, immutable for the session's lifetime
    pub player_id: String,
    /// Endpoint every packet for this player is sent to
    pub addr: SocketAddr,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
    /// Last time any datagram arrived from this endpoint
    pub last_seen: Instant,
}

impl Session {
    /// Creates a live session at the given spawn point
    pub fn new(player_id: String, addr: SocketAddr, x: f32, y: f32) -> Self {
        Self {
            player_id,
            addr,
            x,
            y,
            alive: true,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the session has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn state(&self) -> PlayerState {
        PlayerState {
            player_id: self.player_id.clone(),
            x: self.x,
            y: self.y,
            dead: !self.alive,
        }
    }
}

/// All connected sessions, indexed by player id and by endpoint
///
/// Both indexes are kept in step: every endpoint maps to exactly one player
/// id and every player id to exactly one endpoint.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    by_addr: HashMap<SocketAddr, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session
    ///
    /// Returns false and leaves the registry untouched if either the player id
    /// or the endpoint is already taken.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.contains_key(&session.player_id) || self.by_addr.contains_key(&session.addr)
        {
            return false;
        }

        info!(
            "Player {} joined from {} at ({:.1}, {:.1})",
            session.player_id, session.addr, session.x, session.y
        );
        self.by_addr.insert(session.addr, session.player_id.clone());
        self.sessions.insert(session.player_id.clone(), session);
        true
    }

    /// Removes a session by player id, returning it if it existed
    pub fn remove(&mut self, player_id: &str) -> Option<Session> {
        let session = self.sessions.remove(player_id)?;
        self.by_addr.remove(&session.addr);
        info!("Player {} left", session.player_id);
        Some(session)
    }

    /// Removes whichever session is bound to `addr`
    pub fn remove_by_addr(&mut self, addr: SocketAddr) -> Option<Session> {
        let player_id = self.by_addr.get(&addr)?.clone();
        self.remove(&player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.sessions.contains_key(player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&Session> {
        self.sessions.get(player_id)
    }

    /// Finds the player id bound to a network address
    ///
    /// Used to associate incoming datagrams with sessions. Returns None for
    /// endpoints that never joined.
    pub fn player_id_for(&self, addr: SocketAddr) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Session> {
        self.by_addr
            .get(&addr)
            .and_then(|player_id| self.sessions.get(player_id))
    }

    /// Refreshes the activity timestamp of the session at `addr`
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        let Some(player_id) = self.by_addr.get(&addr) else {
            return false;
        };
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Stores a reported position; last write wins
    pub fn set_position(&mut self, player_id: &str, x: f32, y: f32) -> bool {
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                session.x = x;
                session.y = y;
                true
            }
            None => false,
        }
    }

    /// Marks a player dead
    ///
    /// Returns true only on the alive → dead transition, so repeated death
    /// reports do not queue extra respawns.
    pub fn mark_dead(&mut self, player_id: &str) -> bool {
        match self.sessions.get_mut(player_id) {
            Some(session) if session.alive => {
                session.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Moves a player to a fresh spawn point and marks them alive
    pub fn respawn(&mut self, player_id: &str, x: f32, y: f32) -> bool {
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                session.x = x;
                session.y = y;
                session.alive = true;
                true
            }
            None => false,
        }
    }

    /// Endpoints of every session except `exclude`
    pub fn addrs_except(&self, exclude: Option<&str>) -> Vec<SocketAddr> {
        self.sessions
            .values()
            .filter(|session| Some(session.player_id.as_str()) != exclude)
            .map(|session| session.addr)
            .collect()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.addrs_except(None)
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Live state of every player, ordered by player id
    pub fn snapshot(&self) -> Vec<PlayerState> {
        let mut states: Vec<PlayerState> = self.sessions.values().map(Session::state).collect();
        states.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        states
    }

    /// Removes sessions that have been silent longer than `timeout`
    ///
    /// Returns the removed sessions so the caller can clean up scores and
    /// announce the departures.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Session> {
        let timed_out: Vec<String> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.player_id.clone())
            .collect();

        timed_out
            .iter()
            .filter_map(|player_id| self.remove(player_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
