//! Game runtime: wires every component to the event bus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         GameRuntime                              │
//! │                                                                  │
//! │  SeedSource ──root-seed──► SimulationController                  │
//! │                               │  ▲                               │
//! │              simulation-start │  │ round-completed               │
//! │                  round-start  ▼  │                               │
//! │  Participants ──round-input──► RoundAggregator ──► ScoreLedger   │
//! │       ▲                                │                         │
//! │       └──── round-input-after-the-fact ┘ (via generators)        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each component gets its own subscription and one consumer loop, so a
//! component sees the events of its topics in publish order. Because
//! `publish` enqueues on every subscription before returning, a
//! `round-start` always reaches the aggregator before any input it causes.
//!
//! # Usage
//!
//! ```ignore
//! use matchpoint_core::{GameConfig, GameRuntime, SimulationRequest};
//! use matchpoint_env::{LocalBus, TokioContext};
//!
//! let runtime = GameRuntime::new(TokioContext::shared(), LocalBus::shared(), GameConfig::default());
//! runtime.start()?;
//! let id = runtime.create_simulation(SimulationRequest::new(2, 3)).await?;
//! ```

use matchpoint_env::{EventBus, GameContext, Subscription, TaskHandle, Topic};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::aggregator::RoundAggregator;
use crate::config::GameConfig;
use crate::controller::{Phase, SimulationController};
use crate::error::GameError;
use crate::events::GameEvent;
use crate::ledger::ScoreLedger;
use crate::model::{RoundResult, ScoreCard, Simulation, SimulationId, SimulationRequest, SimulationStatus};
use crate::participant::Participant;
use crate::seed::{LatestSeed, SeedSource};

/// One running game engine.
///
/// Generic over the context and bus implementations, so the same runtime
/// runs on tokio with wall-clock time or inside the simulation harness.
pub struct GameRuntime<Ctx, Bus>
where
    Ctx: GameContext,
    Bus: EventBus,
{
    ctx: Arc<Ctx>,
    bus: Arc<Bus>,
    config: GameConfig,

    /// Shared between the seed source and the controller; lives as long
    /// as the runtime
    latest_seed: Arc<LatestSeed>,

    controller: Arc<SimulationController<Ctx, Bus>>,
    aggregator: Arc<RoundAggregator>,
    ledger: Arc<ScoreLedger>,
    participants: Vec<Arc<Participant>>,

    /// Consumer loops and the seed timer
    tasks: Mutex<Vec<TaskHandle>>,

    /// Set by the first `start`; components must have exactly one consumer
    started: AtomicBool,
}

impl<Ctx, Bus> GameRuntime<Ctx, Bus>
where
    Ctx: GameContext,
    Bus: EventBus,
{
    /// Builds every component. Nothing runs until [`start`](Self::start).
    pub fn new(ctx: Arc<Ctx>, bus: Arc<Bus>, config: GameConfig) -> Self {
        let latest_seed = LatestSeed::shared(config.initial_seed);
        let controller = Arc::new(SimulationController::new(
            Arc::clone(&ctx),
            Arc::clone(&bus),
            &config,
            Arc::clone(&latest_seed),
        ));
        let participants = Participant::roster(&config).into_iter().map(Arc::new).collect();

        Self {
            ctx,
            bus,
            config,
            latest_seed,
            controller,
            aggregator: Arc::new(RoundAggregator::new()),
            ledger: Arc::new(ScoreLedger::new()),
            participants,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Subscribes every component and spawns the consumer loops and the
    /// seed timer.
    ///
    /// All subscriptions are registered before any loop runs, so no event
    /// published after `start` returns is missed.
    ///
    /// Fails with [`GameError::AlreadyStarted`] on every call after the
    /// first; a second set of consumers would double-count round inputs.
    pub fn start(&self) -> Result<(), GameError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GameError::AlreadyStarted);
        }

        let controller_sub = self.bus.subscribe(
            "simulation-controller",
            &[Topic::RootSeed, Topic::SimulationStart, Topic::RoundCompleted],
        )?;
        let aggregator_sub = self
            .bus
            .subscribe("round-aggregator", &[Topic::RoundStart, Topic::RoundInput])?;
        let ledger_sub = self
            .bus
            .subscribe("score-ledger", &[Topic::RoundCompleted, Topic::SimulationCompleted])?;
        let participant_subs = self
            .participants
            .iter()
            .map(|p| self.bus.subscribe(p.name(), p.role().topics()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut handles = Vec::with_capacity(self.participants.len() + 4);

        let controller = Arc::clone(&self.controller);
        handles.push(self.ctx.spawn(
            "simulation-controller",
            consume(controller_sub, move |event| {
                let controller = Arc::clone(&controller);
                async move { controller.handle(event).await.map(|_| Vec::new()) }
            }, Arc::clone(&self.bus), Arc::clone(&self.ctx)),
        )?);

        let aggregator = Arc::clone(&self.aggregator);
        handles.push(self.ctx.spawn(
            "round-aggregator",
            consume(aggregator_sub, move |event| {
                let result = aggregator.handle(event);
                async move { result }
            }, Arc::clone(&self.bus), Arc::clone(&self.ctx)),
        )?);

        let ledger = Arc::clone(&self.ledger);
        handles.push(self.ctx.spawn(
            "score-ledger",
            consume(ledger_sub, move |event| {
                let result = ledger.handle(event);
                async move { result }
            }, Arc::clone(&self.bus), Arc::clone(&self.ctx)),
        )?);

        for (participant, sub) in self.participants.iter().zip(participant_subs) {
            let name = participant.name().to_string();
            let participant = Arc::clone(participant);
            handles.push(self.ctx.spawn(
                &name,
                consume(sub, move |event| {
                    let result = participant.handle(event);
                    async move { result }
                }, Arc::clone(&self.bus), Arc::clone(&self.ctx)),
            )?);
        }

        if let Some(interval) = self.config.seed_interval() {
            let source = SeedSource::new(Arc::clone(&self.latest_seed), interval);
            handles.push(self.ctx.spawn(
                "seed-source",
                source.run(Arc::clone(&self.ctx), Arc::clone(&self.bus)),
            )?);
        }

        tracing::info!(
            participants = self.participants.len(),
            players = self.config.number_of_players,
            context_seed = self.ctx.seed(),
            "game runtime started"
        );
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        Ok(())
    }

    /// Accepts a create-simulation request. Acknowledgment only: the
    /// simulation runs asynchronously.
    pub async fn create_simulation(&self, request: SimulationRequest) -> Result<SimulationId, GameError> {
        self.controller.start_simulation(request).await
    }

    /// Every score card, ordered by simulation id.
    pub fn list_simulations(&self) -> Vec<ScoreCard> {
        self.ledger.score_cards()
    }

    /// Retained round history of one simulation.
    pub fn simulation_detail(&self, simulation_id: SimulationId) -> Vec<RoundResult> {
        self.ledger.history(simulation_id)
    }

    /// Progress snapshot of one simulation.
    pub fn simulation(&self, simulation_id: SimulationId) -> Option<Simulation> {
        self.controller.simulation(simulation_id)
    }

    /// Progress phase of one simulation.
    pub fn phase(&self, simulation_id: SimulationId) -> Option<Phase> {
        self.controller.phase(simulation_id)
    }

    /// Score card of one simulation.
    pub fn score_card(&self, simulation_id: SimulationId) -> Option<ScoreCard> {
        self.ledger.score_card(simulation_id)
    }

    /// True once the ledger has closed the simulation's card.
    pub fn is_complete(&self, simulation_id: SimulationId) -> bool {
        self.ledger
            .score_card(simulation_id)
            .map(|card| card.status == SimulationStatus::Complete)
            .unwrap_or(false)
    }

    /// Polls until the simulation's card closes or `max_wait` of context
    /// time passes. Returns whether it completed.
    pub async fn wait_for_completion(&self, simulation_id: SimulationId, poll: Duration, max_wait: Duration) -> bool {
        let deadline = self.ctx.now().saturating_add(max_wait);
        while self.ctx.now() < deadline {
            if self.is_complete(simulation_id) {
                return true;
            }
            self.ctx.sleep(poll).await;
        }
        self.is_complete(simulation_id)
    }

    /// Publishes a root seed immediately, outside the timer.
    pub async fn inject_seed(&self, seed: u32) -> Result<(), GameError> {
        let interval = self.config.seed_interval().unwrap_or_default();
        SeedSource::new(Arc::clone(&self.latest_seed), interval)
            .emit(self.ctx.as_ref(), self.bus.as_ref(), seed)
            .await?;
        Ok(())
    }

    /// Current value of the latest-seed cell.
    pub fn latest_seed(&self) -> u32 {
        self.latest_seed.get()
    }

    /// The runtime's configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// The aggregator, for inspecting in-flight rounds.
    pub fn aggregator(&self) -> &RoundAggregator {
        &self.aggregator
    }

    /// Number of spawned background tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Aborts every consumer loop, the seed timer, and pending round timers.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in tasks.drain(..) {
            tracing::trace!(task = handle.name(), "aborting");
            handle.abort();
        }
        self.controller.cancel_timers();
        tracing::info!("game runtime stopped");
    }
}

/// Consumer loop: decode, handle, publish outputs. Errors are logged and
/// the event is dropped.
async fn consume<Ctx, Bus, F, Fut>(mut sub: Subscription, handler: F, bus: Arc<Bus>, ctx: Arc<Ctx>)
where
    Ctx: GameContext,
    Bus: EventBus,
    F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<GameEvent>, GameError>> + Send,
{
    while let Some(envelope) = sub.recv().await {
        tracing::trace!(consumer = sub.consumer(), topic = %envelope.topic, bytes = envelope.size(), "received");

        let outputs = match GameEvent::decode(&envelope) {
            Ok(event) => handler(event).await,
            Err(e) => Err(e),
        };

        let outputs = match outputs {
            Ok(outputs) => outputs,
            Err(e) if e.is_dropped_event() => {
                tracing::warn!(consumer = sub.consumer(), topic = %envelope.topic, error = %e, "event dropped");
                continue;
            }
            Err(e) => {
                tracing::error!(consumer = sub.consumer(), topic = %envelope.topic, error = %e, "handler failed");
                continue;
            }
        };

        for event in outputs {
            let published = match event.encode(ctx.timestamp_ms()) {
                Ok(envelope) => bus.publish(envelope).await.map_err(GameError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                tracing::warn!(consumer = sub.consumer(), error = %e, "publish failed");
            }
        }
    }
    tracing::debug!(consumer = sub.consumer(), "subscription closed");
}
