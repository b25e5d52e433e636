//! Per-round kill counts and winner detection.

use log::info;
use std::collections::{BTreeMap, HashMap};

/// Kill counts per player and the round's winner latch.
///
/// The first player to reach the winning score becomes the winner; the latch
/// holds until [`ScoreTracker::reset`] even if other players catch up.
#[derive(Debug)]
pub struct ScoreTracker {
    scores: HashMap<String, u32>,
    winner: Option<String>,
    winning_score: u32,
}

impl ScoreTracker {
    pub fn new(winning_score: u32) -> Self {
        Self {
            scores: HashMap::new(),
            winner: None,
            winning_score,
        }
    }

    /// Seeds a player at zero. Existing entries are left untouched.
    pub fn add_player(&mut self, player_id: &str) {
        self.scores.entry(player_id.to_string()).or_insert(0);
    }

    pub fn remove_player(&mut self, player_id: &str) -> bool {
        self.scores.remove(player_id).is_some()
    }

    /// Credits one kill and returns the new total, or `None` for an unknown player.
    pub fn add_kill(&mut self, player_id: &str) -> Option<u32> {
        let score = self.scores.get_mut(player_id)?;
        *score += 1;
        let new_score = *score;

        if new_score >= self.winning_score && self.winner.is_none() {
            info!("Player {} reached {} kills", player_id, new_score);
            self.winner = Some(player_id.to_string());
        }

        Some(new_score)
    }

    pub fn score(&self, player_id: &str) -> Option<u32> {
        self.scores.get(player_id).copied()
    }

    pub fn has_winner(&self) -> bool {
        self.winner.is_some()
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    /// Owned copy of every score, ordered by player id.
    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.scores
            .iter()
            .map(|(id, score)| (id.clone(), *score))
            .collect()
    }

    /// Clears every score and the winner latch.
    pub fn reset(&mut self) {
        self.scores.clear();
        self.winner = None;
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
