//! Race progress types.
//!
//! A [`RaceResult`] is the per-chain aggregate the orchestrator folds
//! transaction outcomes into. Its mutators refuse to touch a result that is
//! already terminal, which is what makes late-arriving outcomes harmless.

use crate::{ChainDescriptor, ChainId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rank given to a chain the user skipped, after every genuine finisher.
pub const SKIPPED_POSITION: u32 = 999;

/// Error marker recorded on a skipped chain.
pub const SKIPPED_MESSAGE: &str = "Skipped by user";

/// Batch sizes a race may be started with.
pub const ALLOWED_TRANSACTION_COUNTS: [usize; 4] = [1, 5, 10, 20];

/// Lifecycle phase of the whole race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RacePhase {
	Idle,
	Funding,
	Ready,
	Racing,
	Finished,
}

impl fmt::Display for RacePhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			RacePhase::Idle => "idle",
			RacePhase::Funding => "funding",
			RacePhase::Ready => "ready",
			RacePhase::Racing => "racing",
			RacePhase::Finished => "finished",
		};
		f.write_str(name)
	}
}

/// Status of a single chain within a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
	Pending,
	Racing,
	Success,
	Error,
}

impl RaceStatus {
	/// Success and error are final; nothing moves a chain out of them.
	pub fn is_terminal(&self) -> bool {
		matches!(self, RaceStatus::Success | RaceStatus::Error)
	}
}

impl fmt::Display for RaceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			RaceStatus::Pending => "pending",
			RaceStatus::Racing => "racing",
			RaceStatus::Success => "success",
			RaceStatus::Error => "error",
		};
		f.write_str(name)
	}
}

/// Outcome of executing one prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
	pub success: bool,
	/// Wall-clock time from submission entry to confirmation or failure.
	pub latency_ms: u64,
	pub tx_hash: Option<String>,
	pub error: Option<String>,
}

impl TransactionResult {
	pub fn success(latency_ms: u64, tx_hash: impl Into<String>) -> Self {
		Self {
			success: true,
			latency_ms,
			tx_hash: Some(tx_hash.into()),
			error: None,
		}
	}

	pub fn failure(latency_ms: u64, error: impl Into<String>) -> Self {
		Self {
			success: false,
			latency_ms,
			tx_hash: None,
			error: Some(error.into()),
		}
	}
}

/// Confirmation record for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub hash: String,
	pub block_number: Option<u64>,
	pub success: bool,
}

impl TransactionReceipt {
	/// Receipt for a submission path that already guarantees confirmation.
	pub fn confirmed(hash: impl Into<String>) -> Self {
		Self {
			hash: hash.into(),
			block_number: None,
			success: true,
		}
	}
}

/// Per-chain race aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
	pub chain_id: ChainId,
	pub name: String,
	pub color: Option<String>,
	pub logo: Option<String>,
	pub status: RaceStatus,
	/// Hash of the most recently confirmed transaction.
	pub tx_hash: Option<String>,
	pub error: Option<String>,
	pub position: Option<u32>,
	pub tx_completed: usize,
	pub tx_total: usize,
	pub tx_latencies: Vec<u64>,
	pub average_latency: Option<u64>,
	pub total_latency: Option<u64>,
	pub skipped: bool,
}

impl RaceResult {
	/// Fresh result for a chain about to race `tx_total` transactions.
	pub fn pending(descriptor: &ChainDescriptor, tx_total: usize) -> Self {
		Self {
			chain_id: descriptor.id.clone(),
			name: descriptor.name.clone(),
			color: descriptor.color.clone(),
			logo: descriptor.logo.clone(),
			status: RaceStatus::Pending,
			tx_hash: None,
			error: None,
			position: None,
			tx_completed: 0,
			tx_total,
			tx_latencies: Vec::new(),
			average_latency: None,
			total_latency: None,
			skipped: false,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// True once the chain needs no further work.
	pub fn is_done(&self) -> bool {
		self.is_terminal() || self.tx_completed >= self.tx_total
	}

	/// Moves a pending chain to racing. Returns whether anything changed.
	pub fn start_racing(&mut self) -> bool {
		if self.status != RaceStatus::Pending {
			return false;
		}
		self.status = RaceStatus::Racing;
		true
	}

	/// Folds one transaction outcome into the aggregate.
	///
	/// Returns false, leaving the result untouched, when the chain is
	/// already terminal.
	pub fn record(&mut self, outcome: &TransactionResult) -> bool {
		if self.is_terminal() {
			return false;
		}

		if !outcome.success {
			self.status = RaceStatus::Error;
			self.error = Some(
				outcome
					.error
					.clone()
					.unwrap_or_else(|| "Transaction failed".to_string()),
			);
			return true;
		}

		self.status = RaceStatus::Racing;
		self.tx_latencies.push(outcome.latency_ms);
		self.tx_completed = self.tx_latencies.len();
		self.tx_hash = outcome.tx_hash.clone();

		let total: u64 = self.tx_latencies.iter().sum();
		let count = self.tx_latencies.len() as u64;
		self.total_latency = Some(total);
		self.average_latency = Some((2 * total + count) / (2 * count));

		if self.tx_completed >= self.tx_total {
			self.status = RaceStatus::Success;
		}
		true
	}

	/// Marks the chain failed without a transaction outcome, e.g. when its
	/// batch could not be prepared.
	pub fn fail(&mut self, error: impl Into<String>) -> bool {
		if self.is_terminal() {
			return false;
		}
		self.status = RaceStatus::Error;
		self.error = Some(error.into());
		true
	}

	/// Forces the chain to a terminal success with the skipped sentinel rank.
	pub fn skip(&mut self) -> bool {
		if self.is_terminal() {
			return false;
		}
		self.status = RaceStatus::Success;
		self.tx_completed = self.tx_total;
		self.position = Some(SKIPPED_POSITION);
		self.error = Some(SKIPPED_MESSAGE.to_string());
		self.skipped = true;
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ChainFamily, UtxoChangeChain};

	fn descriptor() -> ChainDescriptor {
		ChainDescriptor {
			id: ChainId::from("fuel-testnet"),
			name: "Fuel Testnet".to_string(),
			color: None,
			logo: None,
			testnet: true,
			layer: None,
			min_balance: None,
			family: ChainFamily::UtxoChange(UtxoChangeChain {
				rpc_url: "http://localhost:4000/v1/graphql".to_string(),
			}),
		}
	}

	#[test]
	fn test_record_aggregates_latency() {
		let mut result = RaceResult::pending(&descriptor(), 5);
		for latency in [10, 20, 15, 25, 30] {
			assert!(result.record(&TransactionResult::success(latency, "0xabc")));
		}

		assert_eq!(result.status, RaceStatus::Success);
		assert_eq!(result.tx_completed, 5);
		assert_eq!(result.total_latency, Some(100));
		assert_eq!(result.average_latency, Some(20));
	}

	#[test]
	fn test_average_rounds_to_nearest() {
		let mut result = RaceResult::pending(&descriptor(), 3);
		result.record(&TransactionResult::success(1, "a"));
		result.record(&TransactionResult::success(2, "b"));
		assert_eq!(result.average_latency, Some(2));
		result.record(&TransactionResult::success(2, "c"));
		assert_eq!(result.average_latency, Some(2));
	}

	#[test]
	fn test_latency_fields_absent_before_first_completion() {
		let result = RaceResult::pending(&descriptor(), 5);
		assert_eq!(result.average_latency, None);
		assert_eq!(result.total_latency, None);
	}

	#[test]
	fn test_terminal_results_ignore_late_outcomes() {
		let mut result = RaceResult::pending(&descriptor(), 5);
		result.record(&TransactionResult::success(10, "a"));
		result.record(&TransactionResult::failure(12, "nonce too low"));
		let frozen = result.clone();

		assert!(!result.record(&TransactionResult::success(5, "late")));
		assert!(!result.fail("late failure"));
		assert!(!result.skip());
		assert_eq!(result, frozen);
		assert_eq!(result.tx_completed, 1);
	}

	#[test]
	fn test_skip_marks_sentinel() {
		let mut result = RaceResult::pending(&descriptor(), 10);
		result.start_racing();
		result.record(&TransactionResult::success(10, "a"));

		assert!(result.skip());
		assert_eq!(result.status, RaceStatus::Success);
		assert_eq!(result.tx_completed, 10);
		assert_eq!(result.position, Some(SKIPPED_POSITION));
		assert_eq!(result.error.as_deref(), Some(SKIPPED_MESSAGE));
		assert!(result.skipped);
	}
}
