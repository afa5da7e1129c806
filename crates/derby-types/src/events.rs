//! Events published by the race orchestrator.
//!
//! Consumers subscribe to a broadcast stream of these instead of observing
//! shared state. Each `ChainUpdated` carries a full immutable snapshot of the
//! chain's result at that point.

use crate::{ChainBalance, RacePhase, RaceResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaceEvent {
	/// The race moved between lifecycle phases.
	PhaseChanged { from: RacePhase, to: RacePhase },
	/// A balance check completed for every configured chain.
	BalancesUpdated { balances: Vec<ChainBalance> },
	/// The race selection was narrowed or replaced.
	SelectionChanged { selected: Vec<String> },
	/// One chain's result changed.
	ChainUpdated { race_id: String, result: RaceResult },
	/// Every chain reached a terminal state.
	RaceFinished {
		race_id: String,
		results: Vec<RaceResult>,
	},
}
