//! Matchpoint Environment Abstraction Layer
//!
//! This crate provides the abstraction allowing the Matchpoint engine to
//! run in both **Production** (tokio, wall clock) and **Simulation**
//! (virtual clock) environments, and to talk to its peers only through
//! a topic-based event bus.
//!
//! # Core Concept
//!
//! Components never call each other. They intercept the environment through
//! two seams:
//! - Time and tasks (`now()`, `sleep()`, `spawn()`) via [`GameContext`]
//! - Events (`publish()`, `subscribe()`) via [`EventBus`]
//!
//! # Example
//!
//! ```ignore
//! use matchpoint_env::{EventBus, GameContext, Topic};
//!
//! async fn consumer_loop<Ctx: GameContext, Bus: EventBus>(ctx: &Ctx, bus: &Bus) {
//!     let mut sub = bus.subscribe("ledger", &[Topic::RoundCompleted]).unwrap();
//!     while let Some(envelope) = sub.recv().await {
//!         handle(envelope);
//!     }
//! }
//! ```

mod bus;
mod context;
mod error;
mod local_bus;
mod tokio_impl;
mod types;

pub use bus::{BusController, EventBus, Subscription};
pub use context::{GameContext, TaskHandle};
pub use error::EnvError;
pub use local_bus::LocalBus;
pub use tokio_impl::TokioContext;
pub use types::{Envelope, Topic};
