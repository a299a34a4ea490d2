//! Named game scenarios for the harness.

use crate::world::SimConfig;
use matchpoint_core::SimulationRequest;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// MP-001: one season of three rounds
    SingleSeason,

    /// MP-002: two seasons of three rounds, crossing a season boundary
    MultiSeason,

    /// MP-003: 25 players in every round
    Crowd,

    /// MP-004: eight simulations in parallel
    Concurrent,

    /// MP-005: 20% of round inputs lost on the bus
    LossyInputs,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleSeason,
            ScenarioId::MultiSeason,
            ScenarioId::Crowd,
            ScenarioId::Concurrent,
            ScenarioId::LossyInputs,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleSeason => "single_season",
            ScenarioId::MultiSeason => "multi_season",
            ScenarioId::Crowd => "crowd",
            ScenarioId::Concurrent => "concurrent",
            ScenarioId::LossyInputs => "lossy_inputs",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleSeason => "1 season x 3 rounds, 3 players",
            ScenarioId::MultiSeason => "2 seasons x 3 rounds, season interval honoured",
            ScenarioId::Crowd => "25 players, barrier of 32 inputs per round",
            ScenarioId::Concurrent => "8 simulations interleaved on one bus",
            ScenarioId::LossyInputs => "20% round-input loss, simulations must stall",
        }
    }

    /// True when the scenario passes by stalling rather than completing.
    pub fn expects_stall(&self) -> bool {
        matches!(self, ScenarioId::LossyInputs)
    }

    /// Builds the world configuration for this scenario.
    pub fn sim_config(&self, seed: u64) -> SimConfig {
        let base = SimConfig {
            seed,
            ..Default::default()
        };

        match self {
            ScenarioId::SingleSeason => SimConfig {
                request: SimulationRequest::new(1, 3).with_intervals(100, 500),
                ..base
            },
            ScenarioId::MultiSeason => SimConfig {
                request: SimulationRequest::new(2, 3).with_intervals(100, 500),
                ..base
            },
            ScenarioId::Crowd => SimConfig {
                game: base.game.clone().with_players(25),
                request: SimulationRequest::new(1, 5).with_intervals(50, 0),
                ..base
            },
            ScenarioId::Concurrent => SimConfig {
                simulations: 8,
                request: SimulationRequest::new(2, 3).with_intervals(100, 500),
                ..base
            },
            ScenarioId::LossyInputs => SimConfig {
                simulations: 4,
                request: SimulationRequest::new(2, 3).with_intervals(100, 500),
                input_drop_rate: 0.2,
                max_virtual_time: std::time::Duration::from_secs(30),
                ..base
            },
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_season" | "singleseason" | "mp-001" => Ok(ScenarioId::SingleSeason),
            "multi_season" | "multiseason" | "mp-002" => Ok(ScenarioId::MultiSeason),
            "crowd" | "mp-003" => Ok(ScenarioId::Crowd),
            "concurrent" | "mp-004" => Ok(ScenarioId::Concurrent),
            "lossy_inputs" | "lossyinputs" | "mp-005" => Ok(ScenarioId::LossyInputs),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
