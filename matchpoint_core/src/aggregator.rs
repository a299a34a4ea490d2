//! Round aggregator: collects every input of a round, detects the
//! barrier and computes match points.
//!
//! # Per-simulation state machine
//!
//! ```text
//! NoRoundInFlight --round-start--> CollectingInputs --last input--> RoundComplete
//!                                        ^                               |
//!                                        +------- reset, next round -----+
//! ```
//!
//! # Concurrency
//!
//! Each simulation's working [`RoundResult`] sits behind its own mutex.
//! "Append input, bump the counter, compare with the expected count,
//! snapshot and reset" happens inside one critical section, so among
//! concurrent arrivals exactly one caller sees the barrier. Different
//! simulations only share the outer map, which is read-locked on the
//! hot path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::GameError;
use crate::events::GameEvent;
use crate::model::{RoundInput, RoundResult, RoundStart, SimulationId};

/// Collects inputs and publishes round results.
pub struct RoundAggregator {
    rounds: RwLock<HashMap<SimulationId, Arc<Mutex<RoundResult>>>>,
}

impl RoundAggregator {
    /// Creates an aggregator with no simulations.
    pub fn new() -> Self {
        Self {
            rounds: RwLock::new(HashMap::new()),
        }
    }

    /// Prepares bookkeeping for a round.
    ///
    /// The first round of a simulation allocates its working state; later
    /// rounds reuse it and only move the round/season cursor.
    pub fn on_round_start(&self, start: &RoundStart) {
        let mut rounds = self.rounds.write().unwrap_or_else(PoisonError::into_inner);
        match rounds.get(&start.simulation_id) {
            Some(entry) => {
                let mut working = entry.lock().unwrap_or_else(PoisonError::into_inner);
                working.round_number = start.round_number;
                working.season_number = start.season_number;
            }
            None => {
                rounds.insert(
                    start.simulation_id,
                    Arc::new(Mutex::new(RoundResult::new(start))),
                );
            }
        }

        tracing::trace!(
            simulation = %start.simulation_id,
            season = start.season_number,
            round = start.round_number,
            "collecting inputs"
        );
    }

    /// Records one input.
    ///
    /// # Returns
    /// * `Ok(Some(result))` - This input completed the round; `result` is
    ///   the snapshot to publish on `round-completed`
    /// * `Ok(None)` - Still waiting for more inputs
    /// * `Err(GameError::UnknownRound)` - No round in flight for the simulation
    pub fn on_round_input(&self, input: RoundInput) -> Result<Option<RoundResult>, GameError> {
        let entry = self
            .rounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&input.simulation_id)
            .cloned()
            .ok_or(GameError::UnknownRound(input.simulation_id))?;

        tracing::debug!(
            simulation = %input.simulation_id,
            source = %input.source_name,
            value = input.value,
            "received input"
        );

        let mut working = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if input.source.is_player_class() {
            working.players_inputs.push(input);
        } else {
            working.generators_inputs.push(input);
        }
        working.inputs_received += 1;

        if working.inputs_received < working.number_of_participants {
            return Ok(None);
        }

        tracing::debug!(simulation = %working.simulation_id, "all round inputs received");
        working.result_for_current_round =
            calculate_match_points(&working.generators_inputs, &working.players_inputs);
        let snapshot = working.clone();

        working.generators_inputs.clear();
        working.players_inputs.clear();
        working.inputs_received = 0;

        tracing::debug!(
            simulation = %snapshot.simulation_id,
            season = snapshot.season_number,
            round = snapshot.round_number,
            results = ?snapshot.result_for_current_round,
            "round completed"
        );
        Ok(Some(snapshot))
    }

    /// Routes one event and returns the events to publish.
    pub fn handle(&self, event: GameEvent) -> Result<Vec<GameEvent>, GameError> {
        match event {
            GameEvent::RoundStart(start) => {
                self.on_round_start(&start);
                Ok(Vec::new())
            }
            GameEvent::RoundInput(input) => Ok(self
                .on_round_input(input)?
                .map(GameEvent::RoundCompleted)
                .into_iter()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Copy of a simulation's working state.
    pub fn round_state(&self, simulation_id: SimulationId) -> Option<RoundResult> {
        self.rounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&simulation_id)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Number of simulations with working state.
    pub fn simulation_count(&self) -> usize {
        self.rounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RoundAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Match points for every player-class input.
///
/// A player scores one point per generator input equal to its guess.
/// Players matching nothing are present with 0.
pub fn calculate_match_points(
    generators: &[RoundInput],
    players: &[RoundInput],
) -> BTreeMap<String, u32> {
    players
        .iter()
        .map(|player| (player.source_name.clone(), count_matches(player.value, generators)))
        .collect()
}

/// Number of generator inputs equal to `value`.
pub fn count_matches(value: u32, generators: &[RoundInput]) -> u32 {
    generators.iter().filter(|g| g.value == value).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use proptest::prelude::*;

    const SIM: SimulationId = SimulationId(1);

    fn start(participants: usize, round: u32, season: u32) -> RoundStart {
        RoundStart {
            simulation_id: SIM,
            seed: 10,
            number_of_participants: participants,
            round_number: round,
            season_number: season,
        }
    }

    fn input(source: SourceKind, name: &str, value: u32) -> RoundInput {
        RoundInput {
            simulation_id: SIM,
            source,
            source_name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_two_matching_generators_score_two() {
        let aggregator = RoundAggregator::new();
        aggregator.on_round_start(&start(3, 1, 1));

        assert!(aggregator.on_round_input(input(SourceKind::Generator, "Generator1", 5)).unwrap().is_none());
        assert!(aggregator.on_round_input(input(SourceKind::Generator, "Generator2", 5)).unwrap().is_none());
        let result = aggregator
            .on_round_input(input(SourceKind::Player, "Player1", 5))
            .unwrap()
            .expect("barrier reached");

        assert_eq!(result.result_for_current_round.get("Player1"), Some(&2));
        assert_eq!(result.inputs_received, 3);
        assert_eq!(result.generators_inputs.len(), 2);
        assert_eq!(result.players_inputs.len(), 1);
    }

    #[test]
    fn test_partial_round_is_retained() {
        let aggregator = RoundAggregator::new();
        aggregator.on_round_start(&start(10, 1, 1));

        for i in 0..4 {
            let r = aggregator.on_round_input(input(SourceKind::Generator, &format!("Generator{}", i), i));
            assert!(r.unwrap().is_none());
        }
        for i in 0..3 {
            let r = aggregator.on_round_input(input(SourceKind::Player, &format!("Player{}", i), i));
            assert!(r.unwrap().is_none());
        }

        let state = aggregator.round_state(SIM).unwrap();
        assert_eq!(state.inputs_received, 7);
        assert_eq!(state.generators_inputs.len(), 4);
        assert_eq!(state.players_inputs.len(), 3);
        assert_eq!(state.players_inputs[2].source_name, "Player2");
        assert!(state.result_for_current_round.is_empty());
    }

    #[test]
    fn test_input_without_round_is_unknown_round() {
        let aggregator = RoundAggregator::new();
        let err = aggregator
            .on_round_input(input(SourceKind::Player, "Player1", 5))
            .unwrap_err();

        assert!(matches!(err, GameError::UnknownRound(SIM)));
    }

    #[test]
    fn test_prediction_engine_is_scored_as_player() {
        let aggregator = RoundAggregator::new();
        aggregator.on_round_start(&start(2, 1, 1));

        aggregator.on_round_input(input(SourceKind::PredictionEngine, "PredictionEngine", 9)).unwrap();
        let result = aggregator
            .on_round_input(input(SourceKind::Generator, "Generator1", 9))
            .unwrap()
            .unwrap();

        assert_eq!(result.result_for_current_round.get("PredictionEngine"), Some(&1));
    }

    #[test]
    fn test_state_resets_and_is_reused_for_next_round() {
        let aggregator = RoundAggregator::new();
        aggregator.on_round_start(&start(2, 1, 1));
        aggregator.on_round_input(input(SourceKind::Generator, "Generator1", 1)).unwrap();
        aggregator.on_round_input(input(SourceKind::Player, "Player1", 2)).unwrap().unwrap();

        let state = aggregator.round_state(SIM).unwrap();
        assert_eq!(state.inputs_received, 0);
        assert!(state.generators_inputs.is_empty());
        assert!(state.players_inputs.is_empty());

        aggregator.on_round_start(&start(2, 2, 1));
        assert_eq!(aggregator.simulation_count(), 1);

        aggregator.on_round_input(input(SourceKind::Generator, "Generator1", 2)).unwrap();
        let second = aggregator
            .on_round_input(input(SourceKind::Player, "Player1", 2))
            .unwrap()
            .unwrap();
        assert_eq!(second.round_number, 2);
        assert_eq!(second.result_for_current_round.get("Player1"), Some(&1));
    }

    #[test]
    fn test_handle_publishes_round_completed_once() {
        let aggregator = RoundAggregator::new();
        aggregator.handle(GameEvent::RoundStart(start(2, 1, 1))).unwrap();

        let first = aggregator
            .handle(GameEvent::RoundInput(input(SourceKind::Generator, "Generator1", 3)))
            .unwrap();
        assert!(first.is_empty());

        let second = aggregator
            .handle(GameEvent::RoundInput(input(SourceKind::Player, "Player1", 4)))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], GameEvent::RoundCompleted(r) if r.result_for_current_round["Player1"] == 0));
    }

    #[test]
    fn test_concurrent_inputs_trigger_barrier_once() {
        const ROUNDS: u32 = 50;
        const PARTICIPANTS: usize = 16;

        let aggregator = Arc::new(RoundAggregator::new());
        for round in 1..=ROUNDS {
            aggregator.on_round_start(&start(PARTICIPANTS, round, 1));

            let barrier = Arc::new(std::sync::Barrier::new(PARTICIPANTS));
            let handles: Vec<_> = (0..PARTICIPANTS)
                .map(|i| {
                    let aggregator = Arc::clone(&aggregator);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        let kind = if i % 2 == 0 { SourceKind::Generator } else { SourceKind::Player };
                        barrier.wait();
                        aggregator
                            .on_round_input(input(kind, &format!("P{}", i), 7))
                            .unwrap()
                    })
                })
                .collect();

            let completed: Vec<RoundResult> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();

            assert_eq!(completed.len(), 1, "round {} completed {} times", round, completed.len());
            let result = &completed[0];
            assert_eq!(result.round_number, round);
            assert_eq!(result.inputs_received, PARTICIPANTS);
            assert!(result.result_for_current_round.values().all(|&p| p == (PARTICIPANTS / 2) as u32));
        }
    }

    fn inputs_strategy(kind: SourceKind, prefix: &'static str) -> impl Strategy<Value = Vec<RoundInput>> {
        prop::collection::vec(0u32..10, 0..12).prop_map(move |values| {
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| input(kind, &format!("{}{}", prefix, i), v))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_match_points_equal_generator_count(
            generators in inputs_strategy(SourceKind::Generator, "Generator"),
            players in inputs_strategy(SourceKind::Player, "Player"),
        ) {
            let points = calculate_match_points(&generators, &players);

            prop_assert_eq!(points.len(), players.len());
            for player in &players {
                let expected = generators.iter().filter(|g| g.value == player.value).count() as u32;
                prop_assert_eq!(points[&player.source_name], expected);
                prop_assert!(points[&player.source_name] <= generators.len() as u32);
            }
        }

        #[test]
        fn prop_barrier_fires_exactly_at_expected_count(expected in 1usize..30, extra_rounds in 1u32..4) {
            let aggregator = RoundAggregator::new();
            aggregator.on_round_start(&start(expected, 1, 1));

            let mut completed = 0;
            for n in 1..=(expected * extra_rounds as usize) {
                let r = aggregator.on_round_input(input(SourceKind::Player, "Player1", 1)).unwrap();
                let state = aggregator.round_state(SIM).unwrap();
                prop_assert!(state.inputs_received < expected);
                if n % expected == 0 {
                    prop_assert!(r.is_some());
                    completed += 1;
                } else {
                    prop_assert!(r.is_none());
                    prop_assert_eq!(state.inputs_received, n % expected);
                }
            }
            prop_assert_eq!(completed, extra_rounds);
        }
    }
}
