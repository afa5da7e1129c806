//! Copy-on-write race result snapshots.
//!
//! All per-chain tasks fold their outcomes into one [`RaceSnapshot`]. Updates
//! are pure transformations applied with `ArcSwap::rcu`, so two chains
//! finishing in the same tick never lose each other's writes, and readers
//! always see a complete immutable snapshot.

use arc_swap::ArcSwap;
use derby_types::{ChainId, RaceResult, RaceStatus};
use std::sync::Arc;

/// Results of one race.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaceSnapshot {
	/// Identifier of the race these results belong to, `None` between races.
	pub race_id: Option<String>,
	/// One result per raced chain, in selection order.
	pub results: Vec<RaceResult>,
	/// Chains in the order they reached success, used to break ranking ties.
	pub finish_order: Vec<ChainId>,
}

impl RaceSnapshot {
	/// Result of one chain, if it is part of this race.
	pub fn get(&self, chain_id: &ChainId) -> Option<&RaceResult> {
		self.results.iter().find(|r| &r.chain_id == chain_id)
	}

	/// True when every chain needs no further work.
	pub fn is_complete(&self) -> bool {
		!self.results.is_empty() && self.results.iter().all(RaceResult::is_done)
	}
}

/// Recomputes positions from scratch.
///
/// Successful, non-skipped chains are ranked 1.. by ascending average latency;
/// the sort is stable over arrival order. Skipped chains keep their sentinel
/// and every other chain has no position.
pub fn rank(results: &mut [RaceResult], finish_order: &[ChainId]) {
	let mut finishers: Vec<(usize, u64, usize)> = results
		.iter()
		.enumerate()
		.filter(|(_, r)| r.status == RaceStatus::Success && !r.skipped)
		.map(|(index, r)| {
			let arrival = finish_order
				.iter()
				.position(|id| id == &r.chain_id)
				.unwrap_or(usize::MAX);
			(index, r.average_latency.unwrap_or(u64::MAX), arrival)
		})
		.collect();
	finishers.sort_by_key(|&(_, _, arrival)| arrival);
	finishers.sort_by_key(|&(_, average, _)| average);

	for result in results.iter_mut().filter(|r| !r.skipped) {
		result.position = None;
	}
	for (position, (index, _, _)) in finishers.into_iter().enumerate() {
		results[index].position = Some(position as u32 + 1);
	}
}

/// Shared handle to the current snapshot.
#[derive(Clone, Default)]
pub struct ResultStore {
	inner: Arc<ArcSwap<RaceSnapshot>>,
}

impl ResultStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> Arc<RaceSnapshot> {
		self.inner.load_full()
	}

	/// Replaces whatever was stored with the initial results of a new race.
	pub fn begin(&self, race_id: &str, results: Vec<RaceResult>) {
		self.inner.store(Arc::new(RaceSnapshot {
			race_id: Some(race_id.to_string()),
			results,
			finish_order: Vec::new(),
		}));
	}

	/// Drops all results; later writes tagged with any race id are ignored.
	pub fn clear(&self) {
		self.inner.store(Arc::new(RaceSnapshot::default()));
	}

	/// Applies `update` to one chain's result of race `race_id`.
	///
	/// `update` returns whether it changed anything; it may run more than once
	/// under contention. Writes tagged with another race id are dropped.
	/// Returns every result whose content changed, including chains whose
	/// position moved because of re-ranking.
	pub fn update<F>(&self, race_id: &str, chain_id: &ChainId, update: F) -> Vec<RaceResult>
	where
		F: Fn(&mut RaceResult) -> bool,
	{
		let mut changed = Vec::new();
		self.inner.rcu(|current| {
			changed.clear();
			let mut next = RaceSnapshot::clone(current);
			if next.race_id.as_deref() != Some(race_id) {
				return next;
			}
			let Some(target) = next.results.iter_mut().find(|r| &r.chain_id == chain_id) else {
				return next;
			};

			let was_success = target.status == RaceStatus::Success;
			if !update(target) {
				return next;
			}
			if !was_success && target.status == RaceStatus::Success && !target.skipped {
				next.finish_order.push(chain_id.clone());
			}

			rank(&mut next.results, &next.finish_order);
			changed = next
				.results
				.iter()
				.zip(current.results.iter())
				.filter(|(after, before)| after != before)
				.map(|(after, _)| after.clone())
				.collect();
			next
		});
		changed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::{
		ChainDescriptor, ChainFamily, EvmChain, EvmSubmission, TransactionResult, SKIPPED_POSITION,
	};

	fn pending(id: u64, total: usize) -> RaceResult {
		let descriptor = ChainDescriptor {
			id: ChainId::from(id),
			name: format!("Chain {}", id),
			color: None,
			logo: None,
			testnet: true,
			layer: None,
			min_balance: None,
			family: ChainFamily::Evm(EvmChain {
				chain_id: id,
				rpc_url: "http://localhost:8545".to_string(),
				submission: EvmSubmission::Standard,
				fallback_gas_price_wei: None,
			}),
		};
		RaceResult::pending(&descriptor, total)
	}

	fn finish(store: &ResultStore, race_id: &str, id: u64, latency: u64) -> Vec<RaceResult> {
		store.update(race_id, &ChainId::from(id), |r| {
			r.record(&TransactionResult::success(latency, "0x01"))
		})
	}

	fn position(store: &ResultStore, id: u64) -> Option<u32> {
		store.snapshot().get(&ChainId::from(id)).and_then(|r| r.position)
	}

	#[test]
	fn test_ranking_by_average_latency() {
		let store = ResultStore::new();
		store.begin("race", vec![pending(1, 1), pending(2, 1), pending(3, 1)]);

		finish(&store, "race", 1, 50);
		assert_eq!(position(&store, 1), Some(1));
		finish(&store, "race", 2, 30);
		finish(&store, "race", 3, 80);

		assert_eq!(position(&store, 2), Some(1));
		assert_eq!(position(&store, 1), Some(2));
		assert_eq!(position(&store, 3), Some(3));
	}

	#[test]
	fn test_ties_keep_arrival_order() {
		let store = ResultStore::new();
		store.begin("race", vec![pending(1, 1), pending(2, 1), pending(3, 1)]);

		finish(&store, "race", 3, 40);
		finish(&store, "race", 1, 40);
		finish(&store, "race", 2, 10);

		assert_eq!(position(&store, 2), Some(1));
		assert_eq!(position(&store, 3), Some(2));
		assert_eq!(position(&store, 1), Some(3));
	}

	#[test]
	fn test_rerank_reports_moved_chains() {
		let store = ResultStore::new();
		store.begin("race", vec![pending(1, 1), pending(2, 1)]);

		finish(&store, "race", 1, 50);
		let changed = finish(&store, "race", 2, 30);

		let ids: Vec<ChainId> = changed.iter().map(|r| r.chain_id.clone()).collect();
		assert_eq!(ids, vec![ChainId::from(1), ChainId::from(2)]);
	}

	#[test]
	fn test_skipped_and_failed_chains_are_not_ranked() {
		let store = ResultStore::new();
		store.begin("race", vec![pending(1, 2), pending(2, 2), pending(3, 1)]);

		store.update("race", &ChainId::from(1), |r| r.skip());
		store.update("race", &ChainId::from(2), |r| {
			r.record(&TransactionResult::failure(5, "nonce too low"))
		});
		finish(&store, "race", 3, 90);

		assert_eq!(position(&store, 1), Some(SKIPPED_POSITION));
		assert_eq!(position(&store, 2), None);
		assert_eq!(position(&store, 3), Some(1));
	}

	#[test]
	fn test_stale_race_writes_are_dropped() {
		let store = ResultStore::new();
		store.begin("old", vec![pending(1, 1)]);
		store.begin("new", vec![pending(1, 1)]);

		assert!(finish(&store, "old", 1, 10).is_empty());
		let snapshot = store.snapshot();
		assert_eq!(snapshot.results[0].status, RaceStatus::Pending);
		assert!(snapshot.finish_order.is_empty());
	}

	#[test]
	fn test_terminal_result_is_frozen() {
		let store = ResultStore::new();
		store.begin("race", vec![pending(1, 1)]);
		finish(&store, "race", 1, 10);
		let before = store.snapshot();

		assert!(finish(&store, "race", 1, 1).is_empty());
		assert!(store
			.update("race", &ChainId::from(1), |r| r.fail("late"))
			.is_empty());
		assert_eq!(*store.snapshot(), *before);
	}

	#[test]
	fn test_concurrent_updates_are_not_lost() {
		let store = ResultStore::new();
		let results = (1..=8).map(|id| pending(id, 50)).collect();
		store.begin("race", results);

		let handles: Vec<_> = (1..=8u64)
			.map(|id| {
				let store = store.clone();
				std::thread::spawn(move || {
					for latency in 0..50 {
						store.update("race", &ChainId::from(id), |r| {
							r.record(&TransactionResult::success(latency, "0x"))
						});
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		let snapshot = store.snapshot();
		assert!(snapshot.is_complete());
		assert!(snapshot.results.iter().all(|r| r.tx_completed == 50));
		assert_eq!(snapshot.finish_order.len(), 8);
	}
}
