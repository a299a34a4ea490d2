//! SimWorld - The simulation harness container.

use crate::context::SimContext;

use matchpoint_core::{GameConfig, GameError, GameRuntime, Phase, SimulationId, SimulationRequest};
use matchpoint_env::{BusController, GameContext, LocalBus, Topic};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Engine configuration; the seed timer is always disabled in the
    /// harness and root seeds are injected instead
    pub game: GameConfig,

    /// Simulations created at launch
    pub simulations: usize,

    /// Shape of every simulation
    pub request: SimulationRequest,

    /// Fraction of `round-input` envelopes the bus drops
    pub input_drop_rate: f64,

    /// Maximum virtual time to wait for completion
    pub max_virtual_time: Duration,

    /// Virtual polling step while waiting
    pub poll_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            game: GameConfig::default(),
            simulations: 1,
            request: SimulationRequest::new(1, 3).with_intervals(100, 500),
            input_drop_rate: 0.0,
            max_virtual_time: Duration::from_secs(120),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// The SimWorld - one engine on a virtual clock and an in-process bus.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Bus, also used for fault injection
    pub bus: Arc<LocalBus>,

    /// The engine under test
    pub runtime: GameRuntime<SimContext, LocalBus>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let bus = LocalBus::shared();

        let game = config
            .game
            .clone()
            .with_seed_interval_ms(0)
            .with_initial_seed(context.draw_root_seed());
        let runtime = GameRuntime::new(Arc::clone(&context), Arc::clone(&bus), game);

        Self {
            config,
            context,
            bus,
            runtime,
        }
    }

    /// Starts the engine and applies fault injection. Must run inside a
    /// tokio runtime.
    pub fn start(&self) -> Result<(), GameError> {
        self.runtime.start()?;
        if self.config.input_drop_rate > 0.0 {
            tracing::info!(rate = self.config.input_drop_rate, "dropping round inputs");
            self.bus.set_drop_rate(Topic::RoundInput, self.config.input_drop_rate);
        }
        Ok(())
    }

    /// Creates the configured simulations, each started under a freshly
    /// injected root seed.
    ///
    /// Waits for the controller to start each simulation before injecting
    /// the next seed, so every simulation reads its own seed.
    pub async fn launch(&self) -> Result<Vec<SimulationId>, GameError> {
        let mut ids = Vec::with_capacity(self.config.simulations);
        for _ in 0..self.config.simulations {
            let seed = self.context.draw_root_seed();
            self.runtime.inject_seed(seed).await?;
            let id = self.runtime.create_simulation(self.config.request.clone()).await?;

            while self.runtime.phase(id) == Some(Phase::AwaitingFirstRound) {
                self.context.sleep(Duration::ZERO).await;
            }
            tracing::debug!(simulation = %id, seed, "launched");
            ids.push(id);
        }
        Ok(ids)
    }

    /// Polls until every simulation's card closes or the virtual deadline
    /// passes. Returns the ids still open.
    pub async fn await_completion(&self, ids: &[SimulationId]) -> Vec<SimulationId> {
        let deadline = self.context.now() + self.config.max_virtual_time;
        loop {
            let open: Vec<SimulationId> = ids
                .iter()
                .copied()
                .filter(|id| !self.runtime.is_complete(*id))
                .collect();
            if open.is_empty() || self.context.now() >= deadline {
                return open;
            }
            self.context.sleep(self.config.poll_interval).await;
        }
    }

    /// Envelopes dropped by fault injection.
    pub fn dropped(&self) -> u64 {
        self.bus.dropped()
    }

    /// Stops the engine.
    pub fn shutdown(&self) {
        self.bus.heal_all();
        self.runtime.shutdown();
    }
}
