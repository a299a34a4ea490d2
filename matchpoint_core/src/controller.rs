//! Simulation controller: the round/season state machine.
//!
//! ```text
//!   create_simulation ──► AwaitingFirstRound ──simulation-start──► Running
//!                                                                    │
//!          ┌──────────────── round-completed ◄───────────────────────┤
//!          │                                                         │
//!          ├─ round < rounds    : round += 1, publish after round interval
//!          ├─ season < seasons  : round = 1, season += 1, publish after season interval
//!          └─ otherwise         : Complete, publish simulation-completed
//! ```
//!
//! The controller is the only publisher of `round-start`, and it publishes
//! round N+1 only after consuming round N's `round-completed`, so two
//! rounds of one simulation never interleave in the aggregator.

use matchpoint_env::{EventBus, GameContext, TaskHandle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::config::GameConfig;
use crate::error::GameError;
use crate::events::GameEvent;
use crate::model::{
    RoundResult, RoundStart, Simulation, SimulationId, SimulationRequest, SimulationStatus,
};
use crate::seed::LatestSeed;

/// Exclusive upper bound of per-round seeds.
pub const ROUND_SEED_RANGE: u32 = 100;

/// Progress phase, finer than [`SimulationStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, `simulation-start` not consumed yet
    AwaitingFirstRound,
    /// A round is in flight or scheduled
    Running,
    /// Last round of last season finished
    Complete,
}

/// What a `round-completed` event did to a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Next round of the same season scheduled
    NextRound { round: u32, season: u32, delay: Duration },
    /// First round of the next season scheduled
    NextSeason { round: u32, season: u32, delay: Duration },
    /// Simulation finished; `simulation-completed` published
    Completed,
    /// Simulation was already complete; event ignored
    AlreadyComplete,
}

/// Per-simulation controller state.
struct SimulationEntry {
    simulation: Simulation,
    phase: Phase,
    /// Seeded once at simulation start; every round seed is drawn from it
    rng: Option<ChaCha8Rng>,
}

/// Owns every simulation record and drives it through rounds and seasons.
pub struct SimulationController<Ctx, Bus>
where
    Ctx: GameContext,
    Bus: EventBus,
{
    ctx: Arc<Ctx>,
    bus: Arc<Bus>,
    latest_seed: Arc<LatestSeed>,
    number_of_participants: usize,
    next_id: AtomicU64,
    simulations: RwLock<HashMap<SimulationId, Arc<Mutex<SimulationEntry>>>>,
    /// Pending delayed round-start publications
    timers: Mutex<HashMap<SimulationId, TaskHandle>>,
}

impl<Ctx, Bus> SimulationController<Ctx, Bus>
where
    Ctx: GameContext,
    Bus: EventBus,
{
    /// Creates a controller with no simulations.
    pub fn new(ctx: Arc<Ctx>, bus: Arc<Bus>, config: &GameConfig, latest_seed: Arc<LatestSeed>) -> Self {
        Self {
            ctx,
            bus,
            latest_seed,
            number_of_participants: config.number_of_participants(),
            next_id: AtomicU64::new(0),
            simulations: RwLock::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, simulation_id: SimulationId) -> Result<Arc<Mutex<SimulationEntry>>, GameError> {
        self.simulations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&simulation_id)
            .cloned()
            .ok_or(GameError::UnknownSimulation(simulation_id))
    }

    async fn publish(&self, event: GameEvent) -> Result<(), GameError> {
        let envelope = event.encode(self.ctx.timestamp_ms())?;
        self.bus.publish(envelope).await?;
        Ok(())
    }

    fn round_start(&self, entry: &mut SimulationEntry) -> RoundStart {
        // Seeded at simulation start; the fallback only covers a start
        // that was never consumed.
        let latest = self.latest_seed.get() as u64;
        let seed = entry
            .rng
            .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(latest))
            .gen_range(0..ROUND_SEED_RANGE);

        RoundStart {
            simulation_id: entry.simulation.simulation_id,
            seed,
            number_of_participants: self.number_of_participants,
            round_number: entry.simulation.current_round_number,
            season_number: entry.simulation.current_season_number,
        }
    }

    /// Registers a simulation and announces it on `simulation-start`.
    ///
    /// Returns as soon as the announcement is published; the first round
    /// starts when the controller consumes its own announcement.
    pub async fn start_simulation(&self, request: SimulationRequest) -> Result<SimulationId, GameError> {
        request.validate()?;

        let simulation_id = SimulationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let simulation = Simulation::new(simulation_id, &request);

        self.simulations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                simulation_id,
                Arc::new(Mutex::new(SimulationEntry {
                    simulation: simulation.clone(),
                    phase: Phase::AwaitingFirstRound,
                    rng: None,
                })),
            );

        tracing::info!(
            simulation = %simulation_id,
            seasons = request.number_of_seasons,
            rounds = request.number_of_rounds,
            "simulation created"
        );
        self.publish(GameEvent::SimulationStart(simulation)).await?;
        Ok(simulation_id)
    }

    /// Seeds the simulation's generator from the latest root seed and
    /// publishes round 1 of season 1.
    ///
    /// A repeated `simulation-start` for a simulation already past its
    /// first round is ignored and returns `Ok(None)`.
    pub async fn on_simulation_start(&self, simulation_id: SimulationId) -> Result<Option<RoundStart>, GameError> {
        let entry = self.entry(simulation_id)?;

        let start = {
            let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
            if entry.phase != Phase::AwaitingFirstRound {
                tracing::warn!(simulation = %simulation_id, phase = ?entry.phase, "duplicate simulation start ignored");
                return Ok(None);
            }

            let root_seed = self.latest_seed.get();
            entry.rng = Some(ChaCha8Rng::seed_from_u64(root_seed as u64));
            entry.phase = Phase::Running;

            tracing::debug!(simulation = %simulation_id, root_seed, "starting simulation");
            self.round_start(&mut entry)
        };

        self.publish(GameEvent::RoundStart(start.clone())).await?;
        Ok(Some(start))
    }

    /// Advances a simulation after one of its rounds completed.
    pub async fn on_round_completed(&self, result: &RoundResult) -> Result<Transition, GameError> {
        let simulation_id = result.simulation_id;
        let entry = self.entry(simulation_id)?;

        let (transition, next) = {
            let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let sim = &mut entry.simulation;

            tracing::debug!(
                simulation = %simulation_id,
                season = sim.current_season_number,
                round = sim.current_round_number,
                "round completed"
            );

            if sim.is_complete() {
                tracing::warn!(simulation = %simulation_id, "round completed after simulation end, ignored");
                return Ok(Transition::AlreadyComplete);
            }

            if sim.current_round_number < sim.number_of_rounds {
                sim.current_round_number += 1;
                let transition = Transition::NextRound {
                    round: sim.current_round_number,
                    season: sim.current_season_number,
                    delay: sim.round_interval(),
                };
                tracing::debug!(simulation = %simulation_id, ?transition, "season has more rounds");
                (transition, Some(self.round_start(&mut entry)))
            } else if sim.current_season_number < sim.number_of_seasons {
                sim.current_round_number = 1;
                sim.current_season_number += 1;
                let transition = Transition::NextSeason {
                    round: 1,
                    season: sim.current_season_number,
                    delay: sim.season_interval(),
                };
                tracing::debug!(simulation = %simulation_id, ?transition, "season completed");
                (transition, Some(self.round_start(&mut entry)))
            } else {
                sim.status = SimulationStatus::Complete;
                entry.phase = Phase::Complete;
                (Transition::Completed, None)
            }
        };

        match (&transition, next) {
            (Transition::NextRound { delay, .. }, Some(start))
            | (Transition::NextSeason { delay, .. }, Some(start)) => {
                self.schedule_round_start(start, *delay)?;
            }
            _ => {
                let simulation = self
                    .simulation(simulation_id)
                    .ok_or(GameError::UnknownSimulation(simulation_id))?;
                tracing::info!(simulation = %simulation_id, "simulation completed");
                self.timers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&simulation_id);
                self.publish(GameEvent::SimulationCompleted(simulation)).await?;
            }
        }

        Ok(transition)
    }

    /// Publishes `start` once `delay` has elapsed, without blocking the caller.
    ///
    /// Not retried: if the timer cannot be enqueued or the delayed publish
    /// fails, the simulation stalls.
    fn schedule_round_start(&self, start: RoundStart, delay: Duration) -> Result<(), GameError> {
        let simulation_id = start.simulation_id;
        let ctx = Arc::clone(&self.ctx);
        let bus = Arc::clone(&self.bus);

        let task = async move {
            ctx.sleep(delay).await;
            let published = match GameEvent::RoundStart(start).encode(ctx.timestamp_ms()) {
                Ok(envelope) => bus.publish(envelope).await.map_err(GameError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                tracing::error!(simulation = %simulation_id, error = %e, "delayed round start lost, simulation stalls");
            }
        };

        let handle = self
            .ctx
            .spawn(&format!("round-start-{}", simulation_id), task)
            .map_err(|e| {
                let err = GameError::SchedulingFailure(e.to_string());
                tracing::error!(simulation = %simulation_id, error = %err, "simulation stalls");
                err
            })?;

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|_, h| !h.is_finished());
        timers.insert(simulation_id, handle);
        Ok(())
    }

    /// Stores a new root seed.
    pub fn on_root_seed(&self, seed: u32) {
        let previous = self.latest_seed.set(seed);
        tracing::trace!(previous, seed, "old seed expired");
    }

    /// Routes one event.
    pub async fn handle(&self, event: GameEvent) -> Result<(), GameError> {
        match event {
            GameEvent::RootSeed(seed) => self.on_root_seed(seed),
            GameEvent::SimulationStart(sim) => {
                self.on_simulation_start(sim.simulation_id).await?;
            }
            GameEvent::RoundCompleted(result) => {
                self.on_round_completed(&result).await?;
            }
            other => {
                tracing::trace!(topic = %other.topic(), "controller ignoring event");
            }
        }
        Ok(())
    }

    /// Snapshot of one simulation.
    pub fn simulation(&self, simulation_id: SimulationId) -> Option<Simulation> {
        self.entry(simulation_id)
            .ok()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).simulation.clone())
    }

    /// Progress phase of one simulation.
    pub fn phase(&self, simulation_id: SimulationId) -> Option<Phase> {
        self.entry(simulation_id)
            .ok()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).phase)
    }

    /// Snapshot of every simulation, ordered by id.
    pub fn simulations(&self) -> Vec<Simulation> {
        let simulations = self.simulations.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Simulation> = simulations
            .values()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).simulation.clone())
            .collect();
        all.sort_by_key(|sim| sim.simulation_id);
        all
    }

    /// Number of delayed round starts not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Aborts every pending delayed round start.
    pub fn cancel_timers(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchpoint_env::{LocalBus, Subscription, TokioContext, Topic};
    use std::collections::BTreeMap;

    type TestController = SimulationController<TokioContext, LocalBus>;

    fn setup(players: usize) -> (TestController, Arc<LocalBus>, Subscription) {
        let bus = LocalBus::shared();
        let sub = bus
            .subscribe(
                "observer",
                &[Topic::SimulationStart, Topic::RoundStart, Topic::SimulationCompleted],
            )
            .unwrap();
        let config = GameConfig::default().with_players(players);
        let controller = SimulationController::new(
            TokioContext::shared(),
            Arc::clone(&bus),
            &config,
            LatestSeed::shared(42),
        );
        (controller, bus, sub)
    }

    fn completed(simulation_id: SimulationId, round: u32, season: u32) -> RoundResult {
        let start = RoundStart {
            simulation_id,
            seed: 0,
            number_of_participants: 10,
            round_number: round,
            season_number: season,
        };
        let mut result = RoundResult::new(&start);
        result.result_for_current_round = BTreeMap::new();
        result
    }

    async fn next_event(sub: &mut Subscription) -> GameEvent {
        let envelope = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("event within timeout")
            .expect("bus open");
        GameEvent::decode(&envelope).unwrap()
    }

    /// Plays the simulation up to (season, round) in flight.
    async fn advance_to(controller: &TestController, id: SimulationId, season: u32, round: u32) {
        loop {
            let sim = controller.simulation(id).unwrap();
            if sim.current_season_number == season && sim.current_round_number == round {
                return;
            }
            controller
                .on_round_completed(&completed(id, sim.current_round_number, sim.current_season_number))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_start_simulation_assigns_ids_and_announces() {
        let (controller, _bus, mut sub) = setup(3);

        let a = controller.start_simulation(SimulationRequest::new(1, 3)).await.unwrap();
        let b = controller.start_simulation(SimulationRequest::new(1, 3)).await.unwrap();
        assert_ne!(a, b);

        match next_event(&mut sub).await {
            GameEvent::SimulationStart(sim) => {
                assert_eq!(sim.simulation_id, a);
                assert_eq!(sim.current_round_number, 1);
                assert_eq!(sim.current_season_number, 1);
                assert_eq!(sim.status, SimulationStatus::Running);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(controller.phase(a), Some(Phase::AwaitingFirstRound));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let (controller, _bus, _sub) = setup(3);
        let err = controller.start_simulation(SimulationRequest::new(1, 0)).await.unwrap_err();

        assert!(matches!(err, GameError::InvalidRequest(_)));
        assert!(controller.simulations().is_empty());
    }

    #[tokio::test]
    async fn test_first_round_start() {
        let (controller, _bus, mut sub) = setup(3);
        let id = controller.start_simulation(SimulationRequest::new(1, 3)).await.unwrap();
        let _ = next_event(&mut sub).await;

        let start = controller.on_simulation_start(id).await.unwrap().unwrap();
        assert_eq!(start.round_number, 1);
        assert_eq!(start.season_number, 1);
        assert_eq!(start.number_of_participants, 3 + crate::config::NON_PLAYER_PARTICIPANTS);
        assert!(start.seed < ROUND_SEED_RANGE);

        assert_eq!(next_event(&mut sub).await, GameEvent::RoundStart(start));
        assert_eq!(controller.phase(id), Some(Phase::Running));

        // Round 1 in flight; the stored cursor still points at it.
        let sim = controller.simulation(id).unwrap();
        assert_eq!((sim.current_season_number, sim.current_round_number), (1, 1));

        // A duplicate start does not restart the simulation.
        assert!(controller.on_simulation_start(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_seeds_follow_one_stream_per_root_seed() {
        let (controller, _bus, mut sub) = setup(3);

        let mut streams = Vec::new();
        for _ in 0..2 {
            let id = controller.start_simulation(SimulationRequest::new(1, 5)).await.unwrap();
            let _ = next_event(&mut sub).await;
            controller.on_simulation_start(id).await.unwrap();

            let mut seeds = Vec::new();
            for round in 1..=5 {
                match next_event(&mut sub).await {
                    GameEvent::RoundStart(start) => {
                        assert_eq!(start.round_number, round);
                        seeds.push(start.seed);
                    }
                    other => panic!("unexpected {:?}", other),
                }
                controller.on_round_completed(&completed(id, round, 1)).await.unwrap();
            }
            assert!(matches!(next_event(&mut sub).await, GameEvent::SimulationCompleted(_)));
            streams.push(seeds);
        }

        // Same root seed, same independent sequence per simulation.
        assert_eq!(streams[0], streams[1]);
        let mut replay = ChaCha8Rng::seed_from_u64(42);
        let expected: Vec<u32> = (0..5).map(|_| replay.gen_range(0..ROUND_SEED_RANGE)).collect();
        assert_eq!(streams[0], expected);
    }

    #[tokio::test]
    async fn test_next_round_within_season() {
        let (controller, _bus, mut sub) = setup(3);
        let id = controller.start_simulation(SimulationRequest::new(1, 3)).await.unwrap();
        controller.on_simulation_start(id).await.unwrap();
        let _ = next_event(&mut sub).await;
        let _ = next_event(&mut sub).await;

        let transition = controller.on_round_completed(&completed(id, 1, 1)).await.unwrap();
        assert_eq!(
            transition,
            Transition::NextRound { round: 2, season: 1, delay: Duration::ZERO }
        );

        match next_event(&mut sub).await {
            GameEvent::RoundStart(start) => {
                assert_eq!(start.round_number, 2);
                assert_eq!(start.season_number, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_round_of_season_rolls_into_next_season() {
        let (controller, _bus, _sub) = setup(3);
        let request = SimulationRequest::new(2, 3).with_intervals(0, 25);
        let id = controller.start_simulation(request).await.unwrap();
        controller.on_simulation_start(id).await.unwrap();
        advance_to(&controller, id, 1, 3).await;

        let transition = controller.on_round_completed(&completed(id, 3, 1)).await.unwrap();
        assert_eq!(
            transition,
            Transition::NextSeason { round: 1, season: 2, delay: Duration::from_millis(25) }
        );

        let sim = controller.simulation(id).unwrap();
        assert_eq!(sim.current_round_number, 1);
        assert_eq!(sim.current_season_number, 2);
        assert_eq!(sim.status, SimulationStatus::Running);
    }

    #[tokio::test]
    async fn test_last_round_of_last_season_completes_once() {
        let (controller, _bus, mut sub) = setup(3);
        let id = controller.start_simulation(SimulationRequest::new(2, 3)).await.unwrap();
        controller.on_simulation_start(id).await.unwrap();
        advance_to(&controller, id, 2, 3).await;

        let transition = controller.on_round_completed(&completed(id, 3, 2)).await.unwrap();
        assert_eq!(transition, Transition::Completed);
        assert_eq!(controller.simulation(id).unwrap().status, SimulationStatus::Complete);
        assert_eq!(controller.phase(id), Some(Phase::Complete));

        // A late duplicate never reverts the status.
        let again = controller.on_round_completed(&completed(id, 3, 2)).await.unwrap();
        assert_eq!(again, Transition::AlreadyComplete);
        assert_eq!(controller.simulation(id).unwrap().status, SimulationStatus::Complete);

        // Drain and count simulation-completed events.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let completions = sub
            .drain()
            .iter()
            .filter(|e| e.topic == Topic::SimulationCompleted)
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_counters_stay_in_bounds() {
        let (controller, _bus, _sub) = setup(3);
        let id = controller.start_simulation(SimulationRequest::new(3, 4)).await.unwrap();
        controller.on_simulation_start(id).await.unwrap();

        for _ in 0..12 {
            let sim = controller.simulation(id).unwrap();
            assert!((1..=sim.number_of_rounds).contains(&sim.current_round_number));
            assert!((1..=sim.number_of_seasons).contains(&sim.current_season_number));
            controller
                .on_round_completed(&completed(id, sim.current_round_number, sim.current_season_number))
                .await
                .unwrap();
        }

        let sim = controller.simulation(id).unwrap();
        assert!(sim.is_complete());
        assert_eq!(sim.current_round_number, 4);
        assert_eq!(sim.current_season_number, 3);
    }

    #[tokio::test]
    async fn test_unknown_simulation_is_rejected() {
        let (controller, _bus, _sub) = setup(3);
        let err = controller
            .on_round_completed(&completed(SimulationId(404), 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, GameError::UnknownSimulation(SimulationId(404))));
        assert!(err.is_dropped_event());
    }

    #[tokio::test]
    async fn test_delayed_round_start_does_not_block_and_can_be_cancelled() {
        let (controller, _bus, mut sub) = setup(3);
        let request = SimulationRequest::new(1, 3).with_intervals(60_000, 0);
        let id = controller.start_simulation(request).await.unwrap();
        controller.on_simulation_start(id).await.unwrap();
        let _ = next_event(&mut sub).await;
        let _ = next_event(&mut sub).await;

        // Returns immediately even though the next round is a minute away.
        tokio::time::timeout(
            Duration::from_secs(1),
            controller.on_round_completed(&completed(id, 1, 1)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(controller.pending_timers(), 1);

        controller.cancel_timers();
        assert_eq!(controller.pending_timers(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_root_seed_event_updates_cell() {
        let (controller, _bus, _sub) = setup(3);
        controller.handle(GameEvent::RootSeed(77)).await.unwrap();
        assert_eq!(controller.latest_seed.get(), 77);
    }

    #[test]
    fn test_scheduling_without_runtime_is_a_scheduling_failure() {
        let bus = LocalBus::shared();
        let controller = SimulationController::new(
            TokioContext::shared(),
            bus,
            &GameConfig::default(),
            LatestSeed::shared(1),
        );
        let start = RoundStart {
            simulation_id: SimulationId(1),
            seed: 1,
            number_of_participants: 10,
            round_number: 2,
            season_number: 1,
        };

        let err = controller.schedule_round_start(start, Duration::ZERO).unwrap_err();
        assert!(matches!(err, GameError::SchedulingFailure(_)));
    }
}
