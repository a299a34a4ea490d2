//! Root seed source and the latest-seed cell.

use matchpoint_env::{EnvError, EventBus, GameContext};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::events::GameEvent;

/// Single-value cell holding the most recent root seed.
///
/// Written by the seed source, read by the simulation controller when a
/// simulation starts. Last write wins. Owned by the runtime that created
/// it and shared by `Arc`.
#[derive(Debug)]
pub struct LatestSeed(AtomicU32);

impl LatestSeed {
    /// Creates a cell holding `initial`.
    pub fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    /// Creates an Arc-wrapped cell.
    pub fn shared(initial: u32) -> Arc<Self> {
        Arc::new(Self::new(initial))
    }

    /// Returns the current seed.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Overwrites the seed, returning the previous value.
    pub fn set(&self, seed: u32) -> u32 {
        self.0.swap(seed, Ordering::AcqRel)
    }
}

/// Periodically draws a fresh root seed in `[1, 99)` and publishes it.
pub struct SeedSource {
    latest: Arc<LatestSeed>,
    interval: Duration,
}

impl SeedSource {
    /// Lowest seed drawn (inclusive)
    pub const MIN_SEED: u32 = 1;

    /// Highest seed drawn (exclusive)
    pub const MAX_SEED: u32 = 99;

    /// Creates a seed source writing into `latest`.
    pub fn new(latest: Arc<LatestSeed>, interval: Duration) -> Self {
        Self { latest, interval }
    }

    /// Draws a uniformly distributed seed.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> u32 {
        rng.gen_range(Self::MIN_SEED..Self::MAX_SEED)
    }

    /// Stores `seed` in the latest-seed cell and publishes it on `root-seed`.
    pub async fn emit<Ctx, Bus>(&self, ctx: &Ctx, bus: &Bus, seed: u32) -> Result<(), EnvError>
    where
        Ctx: GameContext,
        Bus: EventBus,
    {
        let previous = self.latest.set(seed);
        tracing::trace!(previous, seed, "root seed refreshed");

        let envelope = GameEvent::RootSeed(seed)
            .encode(ctx.timestamp_ms())
            .map_err(|e| EnvError::SerializationError(e.to_string()))?;
        bus.publish(envelope).await.map(|_| ())
    }

    /// Timer loop: one fresh seed per tick until the bus closes.
    ///
    /// A failed tick is not retried; the next tick simply refreshes again.
    pub async fn run<Ctx, Bus>(self, ctx: Arc<Ctx>, bus: Arc<Bus>)
    where
        Ctx: GameContext,
        Bus: EventBus,
    {
        loop {
            let seed = Self::draw(&mut rand::thread_rng());
            match self.emit(ctx.as_ref(), bus.as_ref(), seed).await {
                Ok(()) => {}
                Err(EnvError::BusClosed(_)) => {
                    tracing::debug!("bus closed, seed source stopping");
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "seed tick lost"),
            }
            ctx.sleep(self.interval).await;
        }
    }
}
