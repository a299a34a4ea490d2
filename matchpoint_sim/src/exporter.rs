//! JSON exporter for ledger snapshots.
//!
//! Writes every score card together with its simulation progress and the
//! retained round history, one file per scenario run.

use matchpoint_core::{RoundResult, ScoreCard, Simulation};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One simulation's ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationExport {
    /// Cumulative scores
    pub score_card: ScoreCard,

    /// Controller-side progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Simulation>,

    /// Every completed round, in arrival order
    pub history: Vec<RoundResult>,
}

/// Complete ledger export for a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Virtual time elapsed, in milliseconds
    pub elapsed_ms: u64,

    /// Per-simulation snapshots
    pub simulations: Vec<SimulationExport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl LedgerExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            elapsed_ms: 0,
            simulations: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a simulation snapshot.
    pub fn add_simulation(&mut self, score_card: ScoreCard, progress: Option<Simulation>, history: Vec<RoundResult>) {
        self.simulations.push(SimulationExport {
            score_card,
            progress,
            history,
        });
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, elapsed_ms: u64) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.elapsed_ms = elapsed_ms;
    }

    /// Total rounds across all histories.
    pub fn rounds(&self) -> usize {
        self.simulations.iter().map(|s| s.history.len()).sum()
    }

    /// Encodes as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
