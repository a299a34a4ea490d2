//! Participants: the generators, players and prediction engine that
//! submit one guess per round.
//!
//! Roles form a closed set. Each role maps `(seed, history)` to a guess
//! through one pure function, [`Role::guess`]; the surrounding
//! [`Participant`] only keeps the state a role needs between rounds.

use matchpoint_env::Topic;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::events::GameEvent;
use crate::model::{RoundInput, RoundResult, RoundStart, SimulationId, SourceKind};

/// Lowest value a player-class guess can take (inclusive).
pub const MIN_GUESS: u32 = 1;

/// Highest value a player-class guess can take (inclusive).
pub const MAX_GUESS: u32 = 99;

/// Exclusive upper bound of generator output (`0..100`).
pub const GENERATOR_RANGE: u32 = 100;

/// Deterministic seed transforms, one per generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    /// s
    Identity,
    /// 2s
    Doubled,
    /// s²
    Squared,
    /// s³
    Cubed,
    /// s + 1000
    Shifted,
    /// 99 - s
    Mirrored,
}

impl GeneratorKind {
    /// Every generator variant, in roster order.
    pub fn all() -> [GeneratorKind; 6] {
        [
            GeneratorKind::Identity,
            GeneratorKind::Doubled,
            GeneratorKind::Squared,
            GeneratorKind::Cubed,
            GeneratorKind::Shifted,
            GeneratorKind::Mirrored,
        ]
    }

    /// Maps the round seed to this generator's private seed.
    pub fn transform(&self, seed: u32) -> u64 {
        let s = seed as u64;
        match self {
            GeneratorKind::Identity => s,
            GeneratorKind::Doubled => s * 2,
            GeneratorKind::Squared => s.pow(2),
            GeneratorKind::Cubed => s.pow(3),
            GeneratorKind::Shifted => s + 1_000,
            GeneratorKind::Mirrored => 99u64.saturating_sub(s),
        }
    }
}

/// What a participant is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator(GeneratorKind),
    Player,
    PredictionEngine,
}

impl Role {
    /// How the aggregator classifies this role's inputs.
    pub fn source_kind(&self) -> SourceKind {
        match self {
            Role::Generator(_) => SourceKind::Generator,
            Role::Player => SourceKind::Player,
            Role::PredictionEngine => SourceKind::PredictionEngine,
        }
    }

    /// Produces one guess.
    ///
    /// - Generators ignore `rng` and `history`: the guess is a pure
    ///   function of the round seed.
    /// - Players draw uniformly from `[1, 99]`.
    /// - The prediction engine picks a uniformly random element of its
    ///   history, or behaves like a player while the history is empty.
    pub fn guess<R: Rng + ?Sized>(&self, seed: u32, history: &[u32], rng: &mut R) -> u32 {
        match self {
            Role::Generator(kind) => {
                ChaCha8Rng::seed_from_u64(kind.transform(seed)).gen_range(0..GENERATOR_RANGE)
            }
            Role::Player => rng.gen_range(MIN_GUESS..=MAX_GUESS),
            Role::PredictionEngine => match history.choose(rng) {
                Some(value) => *value,
                None => rng.gen_range(MIN_GUESS..=MAX_GUESS),
            },
        }
    }

    /// Topics a participant with this role listens to.
    pub fn topics(&self) -> &'static [Topic] {
        match self {
            Role::Generator(_) => &[Topic::RoundStart, Topic::RoundCompleted],
            Role::Player => &[Topic::RoundStart],
            Role::PredictionEngine => &[Topic::RoundStart, Topic::RoundInputAfterTheFact],
        }
    }
}

/// A participant instance with its per-role state.
pub struct Participant {
    name: String,
    role: Role,

    /// Generators: own input per simulation, republished after the fact
    last_inputs: Mutex<HashMap<SimulationId, RoundInput>>,

    /// Prediction engine: every value revealed after the fact (unbounded)
    history: Mutex<Vec<u32>>,
}

impl Participant {
    /// Creates a participant.
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            last_inputs: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// `Generator1..Generator6`.
    pub fn generator(index: usize, kind: GeneratorKind) -> Self {
        Self::new(format!("Generator{}", index), Role::Generator(kind))
    }

    /// `Player1..PlayerN`.
    pub fn player(index: usize) -> Self {
        Self::new(format!("Player{}", index), Role::Player)
    }

    /// The single prediction engine.
    pub fn prediction_engine() -> Self {
        Self::new("PredictionEngine", Role::PredictionEngine)
    }

    /// Builds the full roster for a configuration: every generator
    /// variant, the prediction engine, then the players.
    pub fn roster(config: &GameConfig) -> Vec<Participant> {
        let mut roster: Vec<Participant> = GeneratorKind::all()
            .into_iter()
            .enumerate()
            .map(|(i, kind)| Participant::generator(i + 1, kind))
            .collect();
        roster.push(Participant::prediction_engine());
        roster.extend((1..=config.number_of_players).map(Participant::player));
        roster
    }

    /// Source name, unique per participant.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The participant's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Computes this round's guess.
    pub fn on_round_start(&self, start: &RoundStart) -> RoundInput {
        let value = match self.role {
            Role::PredictionEngine => {
                // Read under the lock so a concurrent append is never torn.
                let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
                if history.is_empty() {
                    tracing::debug!("no history, picking random number");
                }
                self.role.guess(start.seed, &history, &mut rand::thread_rng())
            }
            _ => self.role.guess(start.seed, &[], &mut rand::thread_rng()),
        };

        let input = RoundInput {
            simulation_id: start.simulation_id,
            source: self.role.source_kind(),
            source_name: self.name.clone(),
            value,
        };

        if let Role::Generator(_) = self.role {
            self.last_inputs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(start.simulation_id, input.clone());
        }

        input
    }

    /// Generators return their own input for the completed round so it
    /// can be republished after the fact.
    pub fn on_round_completed(&self, result: &RoundResult) -> Option<RoundInput> {
        match self.role {
            Role::Generator(_) => self
                .last_inputs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&result.simulation_id)
                .cloned(),
            _ => None,
        }
    }

    /// The prediction engine learns a revealed value.
    pub fn on_after_the_fact(&self, input: &RoundInput) {
        if self.role == Role::PredictionEngine {
            tracing::debug!(source = %input.source_name, value = input.value, "received after the fact");
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(input.value);
        }
    }

    /// Routes one event and returns the events to publish.
    pub fn handle(&self, event: GameEvent) -> Result<Vec<GameEvent>, GameError> {
        let outputs = match event {
            GameEvent::RoundStart(start) => vec![GameEvent::RoundInput(self.on_round_start(&start))],
            GameEvent::RoundCompleted(result) => self
                .on_round_completed(&result)
                .map(GameEvent::RoundInputAfterTheFact)
                .into_iter()
                .collect(),
            GameEvent::RoundInputAfterTheFact(input) => {
                self.on_after_the_fact(&input);
                Vec::new()
            }
            other => {
                tracing::trace!(participant = %self.name, topic = %other.topic(), "ignoring event");
                Vec::new()
            }
        };
        Ok(outputs)
    }

    /// Number of values the prediction engine has learned.
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn round_start(seed: u32) -> RoundStart {
        RoundStart {
            simulation_id: SimulationId(1),
            seed,
            number_of_participants: 10,
            round_number: 1,
            season_number: 1,
        }
    }

    fn revealed(value: u32) -> RoundInput {
        RoundInput {
            simulation_id: SimulationId(1),
            source: SourceKind::Generator,
            source_name: "Generator1".to_string(),
            value,
        }
    }

    #[test]
    fn test_generator_is_deterministic_per_seed() {
        for kind in GeneratorKind::all() {
            let role = Role::Generator(kind);
            for seed in 1..99 {
                let a = role.guess(seed, &[], &mut rand::thread_rng());
                let b = role.guess(seed, &[], &mut rand::thread_rng());
                assert_eq!(a, b);
                assert!(a < GENERATOR_RANGE);
            }
        }
    }

    #[test]
    fn test_generator_transforms_are_distinct() {
        let transforms: HashSet<u64> = GeneratorKind::all().iter().map(|k| k.transform(7)).collect();
        assert_eq!(transforms.len(), 6);
        assert_eq!(GeneratorKind::Cubed.transform(7), 343);
        assert_eq!(GeneratorKind::Mirrored.transform(7), 92);
    }

    #[test]
    fn test_player_draws_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut seen = HashSet::new();
        for _ in 0..20_000 {
            let v = Role::Player.guess(50, &[], &mut rng);
            assert!((MIN_GUESS..=MAX_GUESS).contains(&v));
            seen.insert(v);
        }
        // Uniform over [1, 99]: every value shows up.
        assert_eq!(seen.len(), 99);
    }

    #[test]
    fn test_prediction_engine_empty_history_draws_like_player() {
        let engine = Participant::prediction_engine();
        for _ in 0..1_000 {
            let input = engine.on_round_start(&round_start(3));
            assert!((MIN_GUESS..=MAX_GUESS).contains(&input.value));
            assert_eq!(input.source, SourceKind::PredictionEngine);
            assert_eq!(input.source_name, "PredictionEngine");
        }
    }

    #[test]
    fn test_prediction_engine_single_history_always_returns_it() {
        let engine = Participant::prediction_engine();
        engine.on_after_the_fact(&revealed(37));

        for _ in 0..1_000 {
            assert_eq!(engine.on_round_start(&round_start(3)).value, 37);
        }
    }

    #[test]
    fn test_prediction_engine_picks_from_history() {
        let engine = Participant::prediction_engine();
        for v in [4, 8, 15] {
            engine.on_after_the_fact(&revealed(v));
        }
        assert_eq!(engine.history_len(), 3);

        for _ in 0..1_000 {
            let v = engine.on_round_start(&round_start(3)).value;
            assert!([4, 8, 15].contains(&v));
        }
    }

    #[test]
    fn test_only_prediction_engine_learns() {
        let player = Participant::player(1);
        player.on_after_the_fact(&revealed(5));
        assert_eq!(player.history_len(), 0);
    }

    #[test]
    fn test_generator_republishes_its_own_guess() {
        let generator = Participant::generator(4, GeneratorKind::Cubed);
        let start = round_start(11);
        let input = generator.on_round_start(&start);

        let result = RoundResult::new(&start);
        let outputs = generator.handle(GameEvent::RoundCompleted(result)).unwrap();

        assert_eq!(outputs, vec![GameEvent::RoundInputAfterTheFact(input)]);
    }

    #[test]
    fn test_generator_without_guess_stays_silent() {
        let generator = Participant::generator(1, GeneratorKind::Identity);
        let result = RoundResult::new(&round_start(11));

        assert!(generator.handle(GameEvent::RoundCompleted(result)).unwrap().is_empty());
    }

    #[test]
    fn test_roster_matches_participant_count() {
        let config = GameConfig::default().with_players(4);
        let roster = Participant::roster(&config);

        assert_eq!(roster.len(), config.number_of_participants());
        let names: HashSet<&str> = roster.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), roster.len());
        assert!(names.contains("Generator6"));
        assert!(names.contains("Player4"));
        assert!(names.contains("PredictionEngine"));
    }

    #[test]
    fn test_history_survives_concurrent_access() {
        let engine = Arc::new(Participant::prediction_engine());
        let mut handles = Vec::new();

        for t in 0..8u32 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    engine.on_after_the_fact(&revealed(1 + (t * 250 + i) % 99));
                    let v = engine.on_round_start(&round_start(1)).value;
                    assert!((MIN_GUESS..=MAX_GUESS).contains(&v));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.history_len(), 2_000);
    }
}
