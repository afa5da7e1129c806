//! Race phase state machine.
//!
//! The current phase lives in a `watch` channel so callers can both read it
//! synchronously and await a target phase. Transitions are validated against
//! a static table and applied atomically inside the channel, so two callers
//! racing on the same transition cannot both win.

use derby_types::RacePhase;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
	#[error("Invalid phase transition from {from} to {to}")]
	InvalidTransition { from: RacePhase, to: RacePhase },
}

// Static transition table - each phase maps to allowed next phases
static TRANSITIONS: Lazy<HashMap<RacePhase, HashSet<RacePhase>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(
		RacePhase::Idle,
		HashSet::from([RacePhase::Funding, RacePhase::Ready]),
	);
	m.insert(
		RacePhase::Funding,
		HashSet::from([RacePhase::Ready, RacePhase::Idle]),
	);
	m.insert(
		RacePhase::Ready,
		HashSet::from([RacePhase::Racing, RacePhase::Funding, RacePhase::Idle]),
	);
	m.insert(
		RacePhase::Racing,
		HashSet::from([RacePhase::Finished, RacePhase::Idle]),
	);
	m.insert(
		RacePhase::Finished,
		HashSet::from([RacePhase::Ready, RacePhase::Idle]),
	);
	m
});

/// Checks if a phase transition is valid.
pub fn is_valid_transition(from: RacePhase, to: RacePhase) -> bool {
	TRANSITIONS
		.get(&from)
		.is_some_and(|allowed| allowed.contains(&to))
}

/// Shared handle to the current race phase.
#[derive(Clone)]
pub struct PhaseMachine {
	sender: Arc<watch::Sender<RacePhase>>,
}

impl PhaseMachine {
	pub fn new() -> Self {
		let (sender, _) = watch::channel(RacePhase::Idle);
		Self {
			sender: Arc::new(sender),
		}
	}

	/// Phase as of this call.
	pub fn current(&self) -> RacePhase {
		*self.sender.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<RacePhase> {
		self.sender.subscribe()
	}

	/// Moves to `to` if the table allows it.
	///
	/// Returns the previous phase, or `None` when already in `to`.
	pub fn transition(&self, to: RacePhase) -> Result<Option<RacePhase>, PhaseError> {
		self.transition_when(to, |_| true)
	}

	/// Like [`transition`](Self::transition), but leaves the phase untouched
	/// (returning `None`) when `guard` rejects the current phase.
	pub fn transition_when<G>(&self, to: RacePhase, guard: G) -> Result<Option<RacePhase>, PhaseError>
	where
		G: FnOnce(RacePhase) -> bool,
	{
		let mut outcome = Ok(None);
		self.sender.send_if_modified(|phase| {
			let from = *phase;
			if from == to || !guard(from) {
				return false;
			}
			if !is_valid_transition(from, to) {
				outcome = Err(PhaseError::InvalidTransition { from, to });
				return false;
			}
			*phase = to;
			outcome = Ok(Some(from));
			true
		});
		outcome
	}
}

impl Default for PhaseMachine {
	fn default() -> Self {
		Self::new()
	}
}
