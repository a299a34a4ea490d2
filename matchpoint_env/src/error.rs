//! Error types for the Matchpoint environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The bus has been shut down and no longer accepts envelopes
    #[error("Bus closed: {0}")]
    BusClosed(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Context operation failed (task could not be spawned, etc.)
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a bus-closed error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::BusClosed(msg.into())
    }

    /// Creates a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::ContextError(msg.into())
    }
}
