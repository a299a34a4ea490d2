//! Common types for the Matchpoint environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event topics. The wire names are the contract between components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Fresh root seed from the seed source
    RootSeed,
    /// A simulation was created and should kick off its first round
    SimulationStart,
    /// A round directive fanned out to every participant
    RoundStart,
    /// One participant's guess for the in-flight round
    RoundInput,
    /// The aggregator reached the barrier for a round
    RoundCompleted,
    /// A generator republishing its guess once the round is over
    RoundInputAfterTheFact,
    /// The last round of the last season finished
    SimulationCompleted,
}

impl Topic {
    /// Returns every topic.
    pub fn all() -> [Topic; 7] {
        [
            Topic::RootSeed,
            Topic::SimulationStart,
            Topic::RoundStart,
            Topic::RoundInput,
            Topic::RoundCompleted,
            Topic::RoundInputAfterTheFact,
            Topic::SimulationCompleted,
        ]
    }

    /// Returns the wire name of the topic.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::RootSeed => "root-seed",
            Topic::SimulationStart => "simulation-start",
            Topic::RoundStart => "round-start",
            Topic::RoundInput => "round-input",
            Topic::RoundCompleted => "round-completed",
            Topic::RoundInputAfterTheFact => "round-input-after-the-fact",
            Topic::SimulationCompleted => "simulation-completed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::all()
            .into_iter()
            .find(|topic| topic.name() == s)
            .ok_or_else(|| format!("Unknown topic: {}", s))
    }
}

/// Envelope for events carried by the bus.
///
/// This is a transport-layer wrapper - the payload is opaque bytes
/// that the consuming component decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id (for tracing duplicates)
    pub id: Uuid,

    /// Topic the envelope was published on
    pub topic: Topic,

    /// The encoded event
    pub payload: Vec<u8>,

    /// Timestamp when the envelope was created (publisher's clock)
    pub timestamp_ms: u64,
}

impl Envelope {
    /// Creates a new envelope with a fresh id.
    pub fn new(topic: Topic, payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            timestamp_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
