//! Matchpoint Simulation Harness
//!
//! Runs the whole engine (seed source, controller, participants,
//! aggregator and ledger) in-process against a virtual clock, then checks
//! what the ledger recorded.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (virtual clock + seeded root seeds)       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  ┌────▼──────────────────────────┐   ┌──────────────────┐   │
//! │  │ GameRuntime                   │◄─►│ LocalBus         │   │
//! │  │ controller / aggregator /     │   │ (drop-rate fault │   │
//! │  │ ledger / participants         │   │  injection)      │   │
//! │  └───────────────────────────────┘   └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                          │
//!                  ScenarioRunner checks
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use matchpoint_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::MultiSeason);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod runner;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{LedgerExport, SimulationExport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimOverrides};
pub use world::{SimConfig, SimWorld};
