//! Harness errors.

use matchpoint_core::GameError;
use thiserror::Error;

/// Errors that abort a harness run before its checks can execute.
#[derive(Debug, Error)]
pub enum SimError {
    /// Async runtime could not be built, or an export could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine rejected a setup step
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Configuration or export JSON could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
