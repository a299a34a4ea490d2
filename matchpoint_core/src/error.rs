//! Error taxonomy for the game engine.
//!
//! Every component is a one-way event consumer: these errors are logged
//! and the offending event is dropped. Nothing is propagated back to
//! the publisher.

use matchpoint_env::{EnvError, Topic};
use thiserror::Error;

use crate::model::SimulationId;

/// Errors raised while handling game events.
#[derive(Debug, Error)]
pub enum GameError {
    /// Event references a simulation with no tracked state
    #[error("Unknown simulation: {0}")]
    UnknownSimulation(SimulationId),

    /// Round input arrived with no round in flight for its simulation
    #[error("No round in flight for simulation {0}")]
    UnknownRound(SimulationId),

    /// Payload failed to decode
    #[error("Malformed event on {topic}: {reason}")]
    MalformedEvent { topic: Topic, reason: String },

    /// Delayed publication could not be enqueued
    #[error("Scheduling failure: {0}")]
    SchedulingFailure(String),

    /// Create-simulation request rejected
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `GameRuntime::start` called on a runtime that is already running
    #[error("Runtime already started")]
    AlreadyStarted,

    /// Bus refused the envelope
    #[error("Bus error: {0}")]
    Bus(#[from] EnvError),
}

impl GameError {
    /// Creates a malformed event error.
    pub fn malformed(topic: Topic, reason: impl std::fmt::Display) -> Self {
        Self::MalformedEvent {
            topic,
            reason: reason.to_string(),
        }
    }

    /// True for errors that mean "this event is stale or lost" rather
    /// than a fault in the engine.
    pub fn is_dropped_event(&self) -> bool {
        matches!(
            self,
            GameError::UnknownSimulation(_)
                | GameError::UnknownRound(_)
                | GameError::MalformedEvent { .. }
        )
    }
}
