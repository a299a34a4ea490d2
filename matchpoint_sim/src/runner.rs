//! Scenario runner - executes game scenarios and checks the engine's
//! invariants against the live run.

use crate::error::SimError;
use crate::exporter::LedgerExport;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use matchpoint_core::{
    calculate_match_points, GameConfig, GeneratorKind, RoundResult, SimulationId, SimulationRequest,
    SimulationStatus,
};
use matchpoint_env::GameContext;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Simulations created
    pub simulations: usize,

    /// Simulations whose score card closed
    pub completed: usize,

    /// Simulations still open at the deadline
    pub stalled: usize,

    /// Completed rounds across all simulations
    pub rounds_observed: usize,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            simulations: 0,
            completed: 0,
            stalled: 0,
            rounds_observed: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Envelopes published on the bus
    pub events_published: u64,

    /// Envelopes dropped by fault injection
    pub events_dropped: u64,

    /// Match points awarded across all rounds
    pub match_points: u64,
}

/// Command-line overrides applied on top of a scenario's shape.
#[derive(Debug, Clone, Default)]
pub struct SimOverrides {
    pub game: Option<GameConfig>,
    pub players: Option<usize>,
    pub simulations: Option<usize>,
    pub seasons: Option<u32>,
    pub rounds: Option<u32>,
    pub round_interval_ms: Option<u64>,
    pub season_interval_ms: Option<u64>,
}

impl SimOverrides {
    /// Applies the overrides to a scenario configuration.
    pub fn apply(&self, mut config: SimConfig) -> SimConfig {
        if let Some(game) = &self.game {
            config.game = game.clone();
        }
        if let Some(players) = self.players {
            config.game.number_of_players = players;
        }
        if let Some(simulations) = self.simulations {
            config.simulations = simulations;
        }
        if let Some(seasons) = self.seasons {
            config.request.number_of_seasons = seasons;
        }
        if let Some(rounds) = self.rounds {
            config.request.number_of_rounds = rounds;
        }
        if let Some(ms) = self.round_interval_ms {
            config.request.interval_between_rounds = ms;
        }
        if let Some(ms) = self.season_interval_ms {
            config.request.interval_between_seasons = ms;
        }
        config
    }
}

/// What the checks found for one simulation.
struct SimulationCheck {
    complete: bool,
    rounds: usize,
    match_points: u64,
}

/// Runs game scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Shape overrides
    overrides: SimOverrides,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            overrides: SimOverrides::default(),
        }
    }

    /// Sets the overrides.
    pub fn with_overrides(mut self, overrides: SimOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and returns the result plus a ledger snapshot.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, LedgerExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let config = self.overrides.apply(scenario.sim_config(self.seed));

        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(SimError::from)
            .and_then(|rt| rt.block_on(self.execute(scenario, config)));

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} could not run: {}", scenario.name(), e);
                let mut export = LedgerExport::new(scenario.name(), self.seed);
                export.finalize(false, Some(e.to_string()), 0);
                (ScenarioResult::failed(scenario, self.seed, e.to_string()), export)
            }
        }
    }

    async fn execute(
        &self,
        scenario: ScenarioId,
        config: SimConfig,
    ) -> Result<(ScenarioResult, LedgerExport), SimError> {
        config.request.validate()?;
        let request = config.request.clone();
        let participants = config.game.number_of_participants();

        let world = SimWorld::new(config);
        world.start()?;
        let ids = world.launch().await?;
        let open = world.await_completion(&ids).await;

        let mut export = LedgerExport::new(scenario.name(), self.seed);
        let mut failures = Vec::new();
        let mut metrics = ScenarioMetrics::default();
        let mut completed = 0;
        let mut rounds_observed = 0;

        for id in &ids {
            match check_simulation(&world, *id, &request, participants) {
                Ok(check) => {
                    if check.complete {
                        completed += 1;
                    }
                    rounds_observed += check.rounds;
                    metrics.match_points += check.match_points;
                }
                Err(reason) => failures.push(format!("simulation {}: {}", id, reason)),
            }

            if let Some(card) = world.runtime.score_card(*id) {
                export.add_simulation(card, world.runtime.simulation(*id), world.runtime.simulation_detail(*id));
            }
        }

        let stalled = open.len();
        if scenario.expects_stall() {
            if stalled == 0 {
                failures.push("every simulation completed despite input loss".to_string());
            }
        } else if stalled > 0 {
            failures.push(format!("{} simulation(s) never completed: {:?}", stalled, open));
        }

        metrics.events_published = world.bus.published();
        metrics.events_dropped = world.dropped();
        let elapsed = world.context.now();
        world.shutdown();

        let passed = failures.is_empty();
        let failure_reason = if passed { None } else { Some(failures.join("; ")) };

        info!(
            "{} finished: {}/{} complete, {} stalled, {} rounds, {} points, t={:.2}s",
            scenario.name(),
            completed,
            ids.len(),
            stalled,
            rounds_observed,
            metrics.match_points,
            elapsed.as_secs_f64()
        );
        export.finalize(passed, failure_reason.clone(), elapsed.as_millis() as u64);

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            simulations: ids.len(),
            completed,
            stalled,
            rounds_observed,
            final_time_secs: elapsed.as_secs_f64(),
            failure_reason,
            metrics,
        };
        Ok((result, export))
    }
}

/// Checks one simulation against the engine's invariants:
/// counters in bounds, history in round/season order with no gaps, each
/// round's barrier met and its points recomputable, the card equal to the
/// sum of the history.
fn check_simulation(
    world: &SimWorld,
    id: SimulationId,
    request: &SimulationRequest,
    participants: usize,
) -> Result<SimulationCheck, String> {
    let sim = world.runtime.simulation(id).ok_or("no controller state")?;
    if !(1..=sim.number_of_rounds).contains(&sim.current_round_number)
        || !(1..=sim.number_of_seasons).contains(&sim.current_season_number)
    {
        return Err(format!(
            "counters out of bounds: season {} round {}",
            sim.current_season_number, sim.current_round_number
        ));
    }

    let history = world.runtime.simulation_detail(id);
    let expected_order = (1..=request.number_of_seasons)
        .flat_map(|season| (1..=request.number_of_rounds).map(move |round| (season, round)));
    for (result, expected) in history.iter().zip(expected_order) {
        let actual = (result.season_number, result.round_number);
        if actual != expected {
            return Err(format!("history out of order: got {:?}, expected {:?}", actual, expected));
        }
        check_round(result, participants)?;
    }

    let total = sim.total_rounds() as usize;
    if history.len() > total {
        return Err(format!("history holds {} rounds, simulation has {}", history.len(), total));
    }

    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for result in &history {
        for (player, points) in &result.result_for_current_round {
            *totals.entry(player.clone()).or_insert(0) += *points as u64;
        }
    }
    let match_points = totals.values().sum();

    let card = world.runtime.score_card(id);
    if let Some(card) = &card {
        if card.players_score != totals {
            return Err(format!("card {:?} differs from history sum {:?}", card.players_score, totals));
        }
    } else if !history.is_empty() {
        return Err("history without a score card".to_string());
    }

    let complete = card.map(|c| c.status == SimulationStatus::Complete).unwrap_or(false);
    if complete {
        if sim.status != SimulationStatus::Complete {
            return Err("card closed while controller still running".to_string());
        }
        if history.len() != total {
            return Err(format!("completed with {} of {} rounds", history.len(), total));
        }
    } else if let Some(pending) = world.runtime.aggregator().round_state(id) {
        if pending.inputs_received >= participants {
            return Err("open round already met its barrier".to_string());
        }
        debug!(simulation = %id, received = pending.inputs_received, participants, "round waiting on inputs");
    }

    Ok(SimulationCheck {
        complete,
        rounds: history.len(),
        match_points,
    })
}

fn check_round(result: &RoundResult, participants: usize) -> Result<(), String> {
    let generators = GeneratorKind::all().len();
    if result.inputs_received != participants
        || result.generators_inputs.len() != generators
        || result.players_inputs.len() != participants - generators
    {
        return Err(format!(
            "round {}/{} closed with {} inputs ({} generators, {} players), expected {}",
            result.season_number,
            result.round_number,
            result.inputs_received,
            result.generators_inputs.len(),
            result.players_inputs.len(),
            participants
        ));
    }

    let recomputed = calculate_match_points(&result.generators_inputs, &result.players_inputs);
    if recomputed != result.result_for_current_round {
        return Err(format!(
            "round {}/{} points do not match its inputs",
            result.season_number, result.round_number
        ));
    }
    Ok(())
}
