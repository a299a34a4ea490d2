//! Matchpoint Simulator CLI
//!
//! Runs game scenarios on a virtual clock, or a live engine on the wall
//! clock, and reports what the score ledger recorded.

use clap::Parser;
use matchpoint_core::{GameConfig, GameRuntime, SimulationRequest};
use matchpoint_env::{LocalBus, TokioContext};
use matchpoint_sim::scenarios::ScenarioId;
use matchpoint_sim::{LedgerExport, ScenarioResult, ScenarioRunner, SimError, SimOverrides};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Matchpoint game simulator
#[derive(Parser, Debug)]
#[command(name = "matchpoint-sim")]
#[command(about = "Run Matchpoint guessing-game simulations", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (single_season, multi_season, crowd, concurrent, lossy_inputs, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Engine configuration file (JSON GameConfig)
    #[arg(long)]
    config: Option<String>,

    /// Number of players per round
    #[arg(short, long)]
    players: Option<usize>,

    /// Root seed refresh period in milliseconds (live mode)
    #[arg(long)]
    seed_interval_ms: Option<u64>,

    /// Seasons per simulation
    #[arg(long)]
    seasons: Option<u32>,

    /// Rounds per season
    #[arg(short, long)]
    rounds: Option<u32>,

    /// Delay between rounds in milliseconds
    #[arg(long)]
    round_interval_ms: Option<u64>,

    /// Delay between seasons in milliseconds
    #[arg(long)]
    season_interval_ms: Option<u64>,

    /// Number of simulations to create
    #[arg(long)]
    simulations: Option<usize>,

    /// Run one live engine on the wall clock instead of scenarios
    #[arg(long)]
    live: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export score cards and round histories to a JSON file
    #[arg(long)]
    export: Option<String>,
}

impl Args {
    fn game_config(&self) -> Result<Option<GameConfig>, SimError> {
        let mut game = match &self.config {
            Some(path) => Some(GameConfig::from_json(&std::fs::read_to_string(path)?)?),
            None => None,
        };
        if let Some(ms) = self.seed_interval_ms {
            game = Some(game.unwrap_or_default().with_seed_interval_ms(ms));
        }
        Ok(game)
    }

    fn overrides(&self) -> Result<SimOverrides, SimError> {
        Ok(SimOverrides {
            game: self.game_config()?,
            players: self.players,
            simulations: self.simulations,
            seasons: self.seasons,
            rounds: self.rounds,
            round_interval_ms: self.round_interval_ms,
            season_interval_ms: self.season_interval_ms,
        })
    }
}

/// Runs a live engine on tokio with the seed timer enabled and waits for
/// every simulation to finish.
fn run_live(args: &Args) -> Result<LedgerExport, SimError> {
    let mut game = args.game_config()?.unwrap_or_default();
    if let Some(players) = args.players {
        game = game.with_players(players);
    }
    let request = SimulationRequest::new(args.seasons.unwrap_or(2), args.rounds.unwrap_or(3))
        .with_intervals(
            args.round_interval_ms.unwrap_or(1_000),
            args.season_interval_ms.unwrap_or(5_000),
        );
    request.validate()?;
    let simulations = args.simulations.unwrap_or(1);

    let max_wait = request.total_pacing().saturating_add(Duration::from_secs(30));

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        let runtime = GameRuntime::new(TokioContext::shared(), LocalBus::shared(), game);
        runtime.start()?;

        let mut ids = Vec::with_capacity(simulations);
        for _ in 0..simulations {
            let id = runtime.create_simulation(request.clone()).await?;
            info!("Simulation {} accepted", id);
            ids.push(id);
        }

        let mut export = LedgerExport::new("live", runtime.latest_seed() as u64);
        let mut all_complete = true;
        for id in &ids {
            if !runtime.wait_for_completion(*id, Duration::from_millis(50), max_wait).await {
                warn!("Simulation {} did not complete within {:?}", id, max_wait);
                all_complete = false;
            }
        }

        for card in runtime.list_simulations() {
            let id = card.simulation_id;
            info!("Simulation {} [{:?}] {:?}", id, card.status, card.players_score);
            export.add_simulation(card, runtime.simulation(id), runtime.simulation_detail(id));
        }
        export.finalize(all_complete, None, 0);

        runtime.shutdown();
        Ok::<_, SimError>(export)
    })
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Matchpoint Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    if args.live {
        match run_live(&args) {
            Ok(export) => {
                if let Some(path) = &args.export {
                    if let Err(e) = export.write_to_file(path) {
                        error!("Failed to write export: {}", e);
                    }
                }
                if args.json {
                    match export.to_json() {
                        Ok(json) => println!("{}", json),
                        Err(e) => error!("Failed to encode summary: {}", e),
                    }
                }
                if !export.passed {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                error!("Live run failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: single_season, multi_season, crowd, concurrent, lossy_inputs, all");
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed, not 'all'");
        std::process::exit(1);
    }

    let overrides = args.overrides().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_overrides(overrides.clone());

        for scenario in &scenarios {
            let (result, export) = runner.run_with_export(*scenario);

            if let Some(path) = &args.export {
                match export.write_to_file(path) {
                    Ok(()) => info!("Exported {} rounds to {}", export.rounds(), path),
                    Err(e) => error!("Failed to write export: {}", e),
                }
            }

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "simulations": r.simulations,
                    "completed": r.completed,
                    "stalled": r.stalled,
                    "rounds": r.rounds_observed,
                    "time_secs": r.final_time_secs,
                    "events_published": r.metrics.events_published,
                    "events_dropped": r.metrics.events_dropped,
                    "match_points": r.metrics.match_points,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
