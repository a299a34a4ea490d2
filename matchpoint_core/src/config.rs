//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generators plus the prediction engine. Every round expects
/// `number_of_players + NON_PLAYER_PARTICIPANTS` inputs.
pub const NON_PLAYER_PARTICIPANTS: usize = 7;

/// Configuration for a game runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Number of human-like players (`Player1..PlayerN`)
    pub number_of_players: usize,

    /// Seed refresh period in milliseconds (0 = no timer; seeds are
    /// injected explicitly)
    pub seed_interval_ms: u64,

    /// Value the latest-seed cell holds before the first refresh
    pub initial_seed: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            number_of_players: 3,
            seed_interval_ms: 1_000,
            initial_seed: 42,
        }
    }
}

impl GameConfig {
    /// Sets the number of players.
    pub fn with_players(mut self, players: usize) -> Self {
        self.number_of_players = players;
        self
    }

    /// Sets the seed refresh period.
    pub fn with_seed_interval_ms(mut self, interval_ms: u64) -> Self {
        self.seed_interval_ms = interval_ms;
        self
    }

    /// Sets the seed used before the first refresh.
    pub fn with_initial_seed(mut self, seed: u32) -> Self {
        self.initial_seed = seed;
        self
    }

    /// Expected inputs per round.
    pub fn number_of_participants(&self) -> usize {
        self.number_of_players + NON_PLAYER_PARTICIPANTS
    }

    /// Seed refresh period, if the timer is enabled.
    pub fn seed_interval(&self) -> Option<Duration> {
        (self.seed_interval_ms > 0).then(|| Duration::from_millis(self.seed_interval_ms))
    }

    /// Parses a JSON configuration; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
