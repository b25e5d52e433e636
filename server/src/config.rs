//! Server tunables. Every field has a default matching the classic ruleset;
//! the binary overrides a subset from the command line.

use crate::spawn::MapLayout;
use rand::Rng;
use shared::{DEFAULT_PORT, WINNING_SCORE};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Range a respawn delay is drawn from, uniformly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnWindow {
    pub min: Duration,
    pub max: Duration,
}

impl RespawnWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn roll<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for RespawnWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(20), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub map: MapLayout,
    pub winning_score: u32,
    pub respawn_window: RespawnWindow,
    /// Period of the respawn scheduler's timing loop.
    pub respawn_tick: Duration,
    /// Period of the `SYNC` / `FULL_STATE` broadcast.
    pub sync_interval: Duration,
    /// Delay before a joiner receives its own copy of the scores.
    pub join_scores_delay: Duration,
    /// Time between a `gameOver` announcement and the score reset.
    pub round_reset_delay: Duration,
    /// Pause after the `SHUTDOWN` broadcast before the socket is released.
    pub shutdown_grace: Duration,
    pub bullet_ttl: Duration,
    /// Idle time after which a session is dropped. Zero disables the check.
    pub session_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            map: MapLayout::default(),
            winning_score: WINNING_SCORE,
            respawn_window: RespawnWindow::default(),
            respawn_tick: Duration::from_millis(16),
            sync_interval: Duration::from_secs(1),
            join_scores_delay: Duration::from_millis(250),
            round_reset_delay: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(100),
            bullet_ttl: Duration::from_secs(10),
            session_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Rejects settings the server loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.respawn_window.min > self.respawn_window.max {
            return Err(ConfigError::InvertedRespawnWindow {
                min: self.respawn_window.min,
                max: self.respawn_window.max,
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sync_interval"));
        }
        if self.respawn_tick.is_zero() {
            return Err(ConfigError::ZeroInterval("respawn_tick"));
        }
        if self.winning_score == 0 {
            return Err(ConfigError::ZeroWinningScore);
        }
        if !self.map.has_spawn_area() {
            return Err(ConfigError::NoSpawnArea {
                width: self.map.width,
                height: self.map.height,
                margin: self.map.road_margin,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("respawn window is inverted: min {min:?} > max {max:?}")]
    InvertedRespawnWindow { min: Duration, max: Duration },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("winning score must be greater than zero")]
    ZeroWinningScore,

    #[error("road margin {margin} leaves no spawn area on a {width}x{height} map")]
    NoSpawnArea { width: f32, height: f32, margin: f32 },
}
