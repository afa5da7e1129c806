//! Balance snapshots.

use crate::ChainId;
use serde::{Deserialize, Serialize};

/// Result of one balance read for one chain.
///
/// A fresh snapshot is produced on every check and replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBalance {
	pub chain_id: ChainId,
	/// Balance in the family's base unit.
	pub balance: u128,
	pub has_balance: bool,
	pub error: Option<String>,
}

impl ChainBalance {
	/// Builds a snapshot, fundable only when `balance` is strictly above `min_balance`.
	pub fn evaluate(chain_id: ChainId, balance: u128, min_balance: u128) -> Self {
		Self {
			chain_id,
			balance,
			has_balance: balance > min_balance,
			error: None,
		}
	}

	/// Balance that could not be read; never counts as funded.
	pub fn failed(chain_id: ChainId, error: impl Into<String>) -> Self {
		Self {
			chain_id,
			balance: 0,
			has_balance: false,
			error: Some(error.into()),
		}
	}
}
