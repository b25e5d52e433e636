use rand::Rng;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Player ids are the remote endpoint plus a random four-digit suffix
pub fn player_id_for<R: Rng>(addr: SocketAddr, rng: &mut R) -> String {
    format!("{}_{}", addr, rng.gen_range(1000..=9999))
}
