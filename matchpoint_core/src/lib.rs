//! Matchpoint Core - round/season orchestration for a guessing game
//!
//! Many simulations run at once. Each simulation is a sequence of seasons,
//! each season a sequence of rounds. In every round the generators guess
//! deterministically from the round seed, the players guess at random, and
//! every player-class guess scores one match point per generator it equals.
//!
//! ```text
//!  ┌────────────┐ root-seed ┌──────────────────────┐ round-start ┌──────────────┐
//!  │ SeedSource ├──────────►│ SimulationController ├────────────►│ Participants │
//!  └────────────┘           └──────────▲───────────┘             └──────┬───────┘
//!                                      │ round-completed          round-input
//!                           ┌──────────┴───────────┐                    │
//!                           │   RoundAggregator    │◄───────────────────┘
//!                           └──────────┬───────────┘
//!                                      ▼
//!                           ┌──────────────────────┐
//!                           │     ScoreLedger      │
//!                           └──────────────────────┘
//! ```
//!
//! Components communicate only through a [`matchpoint_env::EventBus`];
//! [`GameRuntime`] wires them together.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod ledger;
pub mod model;
pub mod participant;
pub mod runtime;
pub mod seed;

// Re-export key types for convenience
pub use aggregator::{calculate_match_points, count_matches, RoundAggregator};
pub use config::{GameConfig, NON_PLAYER_PARTICIPANTS};
pub use controller::{Phase, SimulationController, Transition};
pub use error::GameError;
pub use events::GameEvent;
pub use ledger::ScoreLedger;
pub use model::{
    RoundInput, RoundResult, RoundStart, ScoreCard, Simulation, SimulationId, SimulationRequest,
    SimulationStatus, SourceKind,
};
pub use participant::{GeneratorKind, Participant, Role};
pub use runtime::GameRuntime;
pub use seed::{LatestSeed, SeedSource};
