//! Typed game events and their JSON encoding.

use matchpoint_env::{Envelope, Topic};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GameError;
use crate::model::{RoundInput, RoundResult, RoundStart, Simulation, SimulationId};

/// Every event that travels on the bus, one variant per topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    RootSeed(u32),
    SimulationStart(Simulation),
    RoundStart(RoundStart),
    RoundInput(RoundInput),
    RoundCompleted(RoundResult),
    RoundInputAfterTheFact(RoundInput),
    SimulationCompleted(Simulation),
}

impl GameEvent {
    /// Returns the topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            GameEvent::RootSeed(_) => Topic::RootSeed,
            GameEvent::SimulationStart(_) => Topic::SimulationStart,
            GameEvent::RoundStart(_) => Topic::RoundStart,
            GameEvent::RoundInput(_) => Topic::RoundInput,
            GameEvent::RoundCompleted(_) => Topic::RoundCompleted,
            GameEvent::RoundInputAfterTheFact(_) => Topic::RoundInputAfterTheFact,
            GameEvent::SimulationCompleted(_) => Topic::SimulationCompleted,
        }
    }

    /// Returns the simulation the event belongs to (none for root seeds).
    pub fn simulation_id(&self) -> Option<SimulationId> {
        match self {
            GameEvent::RootSeed(_) => None,
            GameEvent::SimulationStart(sim) | GameEvent::SimulationCompleted(sim) => {
                Some(sim.simulation_id)
            }
            GameEvent::RoundStart(start) => Some(start.simulation_id),
            GameEvent::RoundInput(input) | GameEvent::RoundInputAfterTheFact(input) => {
                Some(input.simulation_id)
            }
            GameEvent::RoundCompleted(result) => Some(result.simulation_id),
        }
    }

    /// Encodes the event into a bus envelope.
    pub fn encode(&self, timestamp_ms: u64) -> Result<Envelope, GameError> {
        let topic = self.topic();
        let payload = match self {
            GameEvent::RootSeed(seed) => to_bytes(topic, seed)?,
            GameEvent::SimulationStart(sim) | GameEvent::SimulationCompleted(sim) => {
                to_bytes(topic, sim)?
            }
            GameEvent::RoundStart(start) => to_bytes(topic, start)?,
            GameEvent::RoundInput(input) | GameEvent::RoundInputAfterTheFact(input) => {
                to_bytes(topic, input)?
            }
            GameEvent::RoundCompleted(result) => to_bytes(topic, result)?,
        };

        Ok(Envelope::new(topic, payload, timestamp_ms))
    }

    /// Decodes an envelope according to its topic.
    ///
    /// # Errors
    /// `GameError::MalformedEvent` when the payload does not parse.
    pub fn decode(envelope: &Envelope) -> Result<Self, GameError> {
        let topic = envelope.topic;
        let bytes = &envelope.payload;

        Ok(match topic {
            Topic::RootSeed => GameEvent::RootSeed(from_bytes(topic, bytes)?),
            Topic::SimulationStart => GameEvent::SimulationStart(from_bytes(topic, bytes)?),
            Topic::RoundStart => GameEvent::RoundStart(from_bytes(topic, bytes)?),
            Topic::RoundInput => GameEvent::RoundInput(from_bytes(topic, bytes)?),
            Topic::RoundCompleted => GameEvent::RoundCompleted(from_bytes(topic, bytes)?),
            Topic::RoundInputAfterTheFact => {
                GameEvent::RoundInputAfterTheFact(from_bytes(topic, bytes)?)
            }
            Topic::SimulationCompleted => {
                GameEvent::SimulationCompleted(from_bytes(topic, bytes)?)
            }
        })
    }
}

fn to_bytes<T: Serialize>(topic: Topic, value: &T) -> Result<Vec<u8>, GameError> {
    serde_json::to_vec(value).map_err(|e| GameError::malformed(topic, e))
}

fn from_bytes<T: DeserializeOwned>(topic: Topic, bytes: &[u8]) -> Result<T, GameError> {
    serde_json::from_slice(bytes).map_err(|e| GameError::malformed(topic, e))
}
