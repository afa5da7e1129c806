//! Race state: the lifecycle phase and the per-chain result snapshot.

pub mod phase;
pub mod results;

pub use phase::{PhaseError, PhaseMachine};
pub use results::{rank, RaceSnapshot, ResultStore};
