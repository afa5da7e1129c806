//! Race orchestration for Chain Derby.
//!
//! The [`RaceEngine`] owns the race lifecycle (idle, funding, ready, racing,
//! finished), drives balance checks across every configured chain, fans the
//! prepared transaction batches out to one task per chain and folds their
//! outcomes into a copy-on-write result snapshot. Consumers observe progress
//! through the broadcast [`EventBus`] or the snapshot accessors; nothing
//! outside the engine mutates race state.

pub mod builder;
pub mod engine;
pub mod monitoring;
pub mod state;

pub use builder::{BuilderError, RaceBuilder};
pub use engine::{event_bus::EventBus, EngineError, EngineSettings, ExcludedChain, RaceEngine};
pub use state::{PhaseError, PhaseMachine, RaceSnapshot, ResultStore};
