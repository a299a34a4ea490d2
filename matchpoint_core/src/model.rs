//! Data model shared by every Matchpoint component.
//!
//! Field names serialize in camelCase so the payloads match the event
//! contract the HTTP layer and external consumers already speak
//! (`simulationId`, `numberOfRounds`, `intervalBetweenRounds`, ...).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::GameError;

/// Unique identifier for a simulation, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(pub u64);

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Running,
    Complete,
}

/// A "create simulation" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    /// Seasons to play
    pub number_of_seasons: u32,

    /// Pause before the first round of a new season (ms)
    pub interval_between_seasons: u64,

    /// Rounds per season
    pub number_of_rounds: u32,

    /// Pause between two rounds of the same season (ms)
    pub interval_between_rounds: u64,
}

impl SimulationRequest {
    /// Creates a request with no pacing delays.
    pub fn new(number_of_seasons: u32, number_of_rounds: u32) -> Self {
        Self {
            number_of_seasons,
            interval_between_seasons: 0,
            number_of_rounds,
            interval_between_rounds: 0,
        }
    }

    /// Sets the pacing delays in milliseconds.
    pub fn with_intervals(mut self, between_rounds_ms: u64, between_seasons_ms: u64) -> Self {
        self.interval_between_rounds = between_rounds_ms;
        self.interval_between_seasons = between_seasons_ms;
        self
    }

    /// Rejects requests whose counters could never satisfy
    /// `1 <= current <= total`.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.number_of_seasons == 0 {
            return Err(GameError::InvalidRequest(
                "numberOfSeasons must be at least 1".to_string(),
            ));
        }
        if self.number_of_rounds == 0 {
            return Err(GameError::InvalidRequest(
                "numberOfRounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sum of every pacing delay the request asks for. Saturates instead
    /// of overflowing on huge intervals.
    pub fn total_pacing(&self) -> Duration {
        let rounds = self
            .interval_between_rounds
            .saturating_mul(self.number_of_rounds as u64)
            .saturating_mul(self.number_of_seasons as u64);
        let seasons = self
            .interval_between_seasons
            .saturating_mul(self.number_of_seasons as u64);
        Duration::from_millis(rounds.saturating_add(seasons))
    }
}

/// A simulation run configuration plus its progress cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    pub simulation_id: SimulationId,
    pub number_of_seasons: u32,
    pub interval_between_seasons: u64,
    pub number_of_rounds: u32,
    pub interval_between_rounds: u64,
    pub current_round_number: u32,
    pub current_season_number: u32,
    pub status: SimulationStatus,
}

impl Simulation {
    /// Creates a running simulation positioned at season 1, round 1.
    pub fn new(simulation_id: SimulationId, request: &SimulationRequest) -> Self {
        Self {
            simulation_id,
            number_of_seasons: request.number_of_seasons,
            interval_between_seasons: request.interval_between_seasons,
            number_of_rounds: request.number_of_rounds,
            interval_between_rounds: request.interval_between_rounds,
            current_round_number: 1,
            current_season_number: 1,
            status: SimulationStatus::Running,
        }
    }

    /// Delay before the next round of the same season.
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.interval_between_rounds)
    }

    /// Delay before the first round of the next season.
    pub fn season_interval(&self) -> Duration {
        Duration::from_millis(self.interval_between_seasons)
    }

    /// Returns true once the last round of the last season finished.
    pub fn is_complete(&self) -> bool {
        self.status == SimulationStatus::Complete
    }

    /// Total rounds the simulation will play.
    pub fn total_rounds(&self) -> u64 {
        self.number_of_seasons as u64 * self.number_of_rounds as u64
    }
}

/// Directive announcing a new round to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStart {
    pub simulation_id: SimulationId,
    pub seed: u32,
    pub number_of_participants: usize,
    pub round_number: u32,
    pub season_number: u32,
}

/// Where a round input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Generator,
    Player,
    PredictionEngine,
}

impl SourceKind {
    /// Everything that is not a generator is scored as a player.
    pub fn is_player_class(&self) -> bool {
        !matches!(self, SourceKind::Generator)
    }
}

/// One participant's guess for the in-flight round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInput {
    pub simulation_id: SimulationId,
    pub source: SourceKind,
    pub source_name: String,
    pub value: u32,
}

/// Aggregator working state for one simulation, and the outcome of the
/// round it most recently completed.
///
/// The published snapshot carries the inputs of the completed round
/// together with `result_for_current_round`; the working copy is reset
/// to empty collections right after the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub simulation_id: SimulationId,
    pub round_number: u32,
    pub season_number: u32,
    pub number_of_participants: usize,
    pub generators_inputs: Vec<RoundInput>,
    pub players_inputs: Vec<RoundInput>,
    pub inputs_received: usize,
    /// Player source name -> match points for the completed round
    pub result_for_current_round: BTreeMap<String, u32>,
}

impl RoundResult {
    /// Creates empty working state for a simulation.
    pub fn new(start: &RoundStart) -> Self {
        Self {
            simulation_id: start.simulation_id,
            round_number: start.round_number,
            season_number: start.season_number,
            number_of_participants: start.number_of_participants,
            generators_inputs: Vec::new(),
            players_inputs: Vec::new(),
            inputs_received: 0,
            result_for_current_round: BTreeMap::new(),
        }
    }

    /// True for season 1, round 1.
    pub fn is_first_round(&self) -> bool {
        self.round_number == 1 && self.season_number == 1
    }
}

/// Cumulative scores for one simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub simulation_id: SimulationId,
    pub status: SimulationStatus,
    pub players_score: BTreeMap<String, u64>,
}

impl ScoreCard {
    /// Creates a running card with no players.
    pub fn new(simulation_id: SimulationId) -> Self {
        Self {
            simulation_id,
            status: SimulationStatus::Running,
            players_score: BTreeMap::new(),
        }
    }

    /// Returns a player's cumulative score (0 if unknown).
    pub fn score(&self, player: &str) -> u64 {
        self.players_score.get(player).copied().unwrap_or(0)
    }
}
