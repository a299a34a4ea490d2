//! Score ledger: cumulative player scores and the retained round history.
//!
//! Consumption is NOT idempotent. Replaying a `round-completed` event
//! adds its scores a second time and appends a second history entry;
//! the bus offers no exactly-once guarantee either, so a duplicate
//! delivery inflates the card.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::GameError;
use crate::events::GameEvent;
use crate::model::{RoundResult, ScoreCard, SimulationId, SimulationStatus};

/// Ledger state for one simulation.
#[derive(Debug)]
struct LedgerEntry {
    card: ScoreCard,
    history: Vec<RoundResult>,
}

/// Accumulates scores per simulation and answers queries.
pub struct ScoreLedger {
    simulations: RwLock<HashMap<SimulationId, Arc<Mutex<LedgerEntry>>>>,
}

impl ScoreLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            simulations: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, simulation_id: SimulationId) -> Result<Arc<Mutex<LedgerEntry>>, GameError> {
        self.simulations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&simulation_id)
            .cloned()
            .ok_or(GameError::UnknownSimulation(simulation_id))
    }

    /// Opens a fresh card for season 1 round 1 with every player at 0.
    ///
    /// History already retained for the id is kept.
    fn open_card(&self, result: &RoundResult) -> Arc<Mutex<LedgerEntry>> {
        let mut card = ScoreCard::new(result.simulation_id);
        for player in result.result_for_current_round.keys() {
            card.players_score.insert(player.clone(), 0);
        }

        let mut simulations = self.simulations.write().unwrap_or_else(PoisonError::into_inner);
        let entry = simulations
            .entry(result.simulation_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(LedgerEntry {
                    card: ScoreCard::new(result.simulation_id),
                    history: Vec::new(),
                }))
            })
            .clone();
        entry.lock().unwrap_or_else(PoisonError::into_inner).card = card;
        entry
    }

    /// Adds a completed round to the card and the history.
    pub fn on_round_completed(&self, result: RoundResult) -> Result<(), GameError> {
        tracing::debug!(
            simulation = %result.simulation_id,
            season = result.season_number,
            round = result.round_number,
            results = ?result.result_for_current_round,
            "received round result"
        );

        let entry = if result.is_first_round() {
            self.open_card(&result)
        } else {
            self.entry(result.simulation_id)?
        };

        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        for (player, &points) in &result.result_for_current_round {
            if points > 0 {
                *entry.card.players_score.entry(player.clone()).or_insert(0) += points as u64;
            }
        }
        tracing::debug!(simulation = %result.simulation_id, score = ?entry.card.players_score, "current score");

        entry.history.push(result);
        Ok(())
    }

    /// Marks a simulation's card complete.
    pub fn on_simulation_completed(&self, simulation_id: SimulationId) -> Result<(), GameError> {
        let entry = self.entry(simulation_id)?;
        entry.lock().unwrap_or_else(PoisonError::into_inner).card.status = SimulationStatus::Complete;
        tracing::info!(simulation = %simulation_id, "score card closed");
        Ok(())
    }

    /// Routes one event. The ledger never publishes.
    pub fn handle(&self, event: GameEvent) -> Result<Vec<GameEvent>, GameError> {
        match event {
            GameEvent::RoundCompleted(result) => self.on_round_completed(result)?,
            GameEvent::SimulationCompleted(sim) => self.on_simulation_completed(sim.simulation_id)?,
            _ => {}
        }
        Ok(Vec::new())
    }

    /// Snapshot of every score card, ordered by simulation id.
    pub fn score_cards(&self) -> Vec<ScoreCard> {
        let simulations = self.simulations.read().unwrap_or_else(PoisonError::into_inner);
        let mut cards: Vec<ScoreCard> = simulations
            .values()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).card.clone())
            .collect();
        cards.sort_by_key(|card| card.simulation_id);
        cards
    }

    /// Snapshot of one simulation's card.
    pub fn score_card(&self, simulation_id: SimulationId) -> Option<ScoreCard> {
        self.entry(simulation_id)
            .ok()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).card.clone())
    }

    /// Every retained round result for a simulation, in arrival order.
    /// Unknown ids yield an empty history.
    pub fn history(&self, simulation_id: SimulationId) -> Vec<RoundResult> {
        self.entry(simulation_id)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).history.clone())
            .unwrap_or_default()
    }
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoundStart, Simulation, SimulationRequest};
    use std::collections::BTreeMap;

    const SIM: SimulationId = SimulationId(1);

    fn result(round: u32, season: u32, scores: &[(&str, u32)]) -> RoundResult {
        let start = RoundStart {
            simulation_id: SIM,
            seed: 1,
            number_of_participants: 10,
            round_number: round,
            season_number: season,
        };
        let mut result = RoundResult::new(&start);
        result.result_for_current_round = scores
            .iter()
            .map(|(name, points)| (name.to_string(), *points))
            .collect::<BTreeMap<_, _>>();
        result
    }

    #[test]
    fn test_first_round_opens_card_with_every_player() {
        let ledger = ScoreLedger::new();
        ledger
            .on_round_completed(result(1, 1, &[("Player1", 2), ("Player2", 0)]))
            .unwrap();

        let card = ledger.score_card(SIM).unwrap();
        assert_eq!(card.status, SimulationStatus::Running);
        assert_eq!(card.score("Player1"), 2);
        assert_eq!(card.players_score.get("Player2"), Some(&0));
    }

    #[test]
    fn test_later_round_for_unknown_simulation_fails() {
        let ledger = ScoreLedger::new();
        let err = ledger.on_round_completed(result(2, 1, &[("Player1", 1)])).unwrap_err();

        assert!(matches!(err, GameError::UnknownSimulation(SIM)));
        assert!(ledger.history(SIM).is_empty());
    }

    #[test]
    fn test_scores_accumulate_monotonically() {
        let ledger = ScoreLedger::new();
        let rounds = [
            result(1, 1, &[("Player1", 1), ("Player2", 0)]),
            result(2, 1, &[("Player1", 0), ("Player2", 3)]),
            result(1, 2, &[("Player1", 2), ("Player2", 1)]),
        ];

        let mut last = 0;
        for r in rounds {
            ledger.on_round_completed(r).unwrap();
            let total = ledger.score_card(SIM).unwrap().score("Player1");
            assert!(total >= last);
            last = total;
        }

        let card = ledger.score_card(SIM).unwrap();
        assert_eq!(card.score("Player1"), 3);
        assert_eq!(card.score("Player2"), 4);

        let history = ledger.history(SIM);
        let cursor: Vec<(u32, u32)> = history.iter().map(|r| (r.season_number, r.round_number)).collect();
        assert_eq!(cursor, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_simulation_completed_closes_card() {
        let ledger = ScoreLedger::new();
        ledger.on_round_completed(result(1, 1, &[("Player1", 0)])).unwrap();

        let sim = Simulation::new(SIM, &SimulationRequest::new(1, 1));
        ledger.handle(GameEvent::SimulationCompleted(sim)).unwrap();

        assert_eq!(ledger.score_card(SIM).unwrap().status, SimulationStatus::Complete);
        assert!(matches!(
            ledger.on_simulation_completed(SimulationId(99)),
            Err(GameError::UnknownSimulation(SimulationId(99)))
        ));
    }

    #[test]
    fn test_replayed_round_is_counted_twice() {
        let ledger = ScoreLedger::new();
        ledger.on_round_completed(result(1, 1, &[("Player1", 0)])).unwrap();

        let round_two = result(2, 1, &[("Player1", 2)]);
        ledger.on_round_completed(round_two.clone()).unwrap();
        ledger.on_round_completed(round_two).unwrap();

        // Known limitation: no de-duplication.
        assert_eq!(ledger.score_card(SIM).unwrap().score("Player1"), 4);
        assert_eq!(ledger.history(SIM).len(), 3);
    }

    #[test]
    fn test_replayed_first_round_resets_card_but_keeps_history() {
        let ledger = ScoreLedger::new();
        ledger.on_round_completed(result(1, 1, &[("Player1", 1)])).unwrap();
        ledger.on_round_completed(result(2, 1, &[("Player1", 5)])).unwrap();
        ledger.on_round_completed(result(1, 1, &[("Player1", 1)])).unwrap();

        assert_eq!(ledger.score_card(SIM).unwrap().score("Player1"), 1);
        assert_eq!(ledger.history(SIM).len(), 3);
    }

    #[test]
    fn test_score_cards_are_listed_by_id() {
        let ledger = ScoreLedger::new();
        for id in [3, 1, 2] {
            let mut r = result(1, 1, &[("Player1", 0)]);
            r.simulation_id = SimulationId(id);
            ledger.on_round_completed(r).unwrap();
        }

        let ids: Vec<u64> = ledger.score_cards().iter().map(|c| c.simulation_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
