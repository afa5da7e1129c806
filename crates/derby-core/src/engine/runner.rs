//! Per-chain race task.
//!
//! One runner drives one chain's prepared batch: transactions are submitted
//! strictly in order, each outcome is folded into the shared snapshot before
//! the next submission, and the loop stops on the first failure or once the
//! chain turns terminal for any other reason (skip, reset).

use crate::engine::event_bus::EventBus;
use crate::state::ResultStore;
use derby_adapters::{ChainAdapter, PreparedTransaction};
use derby_types::{truncate_id, RaceEvent, RaceResult};
use std::sync::Arc;
use tracing::instrument;

/// Publishes one `ChainUpdated` event per changed result.
pub(crate) fn publish_changes(event_bus: &EventBus, race_id: &str, changed: Vec<RaceResult>) {
	for result in changed {
		event_bus
			.publish(RaceEvent::ChainUpdated {
				race_id: race_id.to_string(),
				result,
			})
			.ok();
	}
}

/// Drives one chain through its prepared batch during a race.
///
/// Every write goes through the result store with the runner's race id, so a
/// runner left over from an earlier race cannot touch newer results.
pub struct ChainRunner {
	adapter: Arc<dyn ChainAdapter>,
	results: ResultStore,
	event_bus: EventBus,
	race_id: String,
}

impl ChainRunner {
	pub fn new(
		adapter: Arc<dyn ChainAdapter>,
		results: ResultStore,
		event_bus: EventBus,
		race_id: String,
	) -> Self {
		Self {
			adapter,
			results,
			event_bus,
			race_id,
		}
	}

	fn apply<F>(&self, update: F) -> bool
	where
		F: Fn(&mut RaceResult) -> bool,
	{
		let changed = self
			.results
			.update(&self.race_id, &self.adapter.descriptor().id, update);
		let applied = !changed.is_empty();
		publish_changes(&self.event_bus, &self.race_id, changed);
		applied
	}

	/// Marks the chain failed before any transaction was sent.
	pub fn fail(&self, error: &str) {
		self.apply(|r| r.fail(error));
	}

	/// Executes the batch in order until done, failed or stopped externally.
	#[instrument(skip_all, fields(
		race_id = %truncate_id(&self.race_id),
		chain_id = %self.adapter.descriptor().id,
		chain = %self.adapter.descriptor().name,
	))]
	pub async fn run(self, batch: Vec<PreparedTransaction>) {
		if !self.apply(RaceResult::start_racing) {
			tracing::debug!("Chain no longer pending, not starting");
			return;
		}
		tracing::info!(transactions = batch.len(), "Racing");

		for prepared in batch {
			let index = prepared.index;
			let still_running = self
				.results
				.snapshot()
				.get(&self.adapter.descriptor().id)
				.is_some_and(|r| !r.is_terminal());
			if !still_running {
				tracing::info!(tx_index = index, "Chain stopped before submission");
				return;
			}

			let outcome = self.adapter.execute_transaction(prepared).await;
			let succeeded = outcome.success;
			if succeeded {
				tracing::info!(
					tx_index = index,
					latency_ms = outcome.latency_ms,
					tx_hash = %truncate_id(outcome.tx_hash.as_deref().unwrap_or_default()),
					"Transaction confirmed"
				);
			} else {
				tracing::warn!(
					tx_index = index,
					latency_ms = outcome.latency_ms,
					error = outcome.error.as_deref().unwrap_or_default(),
					"Transaction failed"
				);
			}

			if !self.apply(|r| r.record(&outcome)) {
				tracing::info!(tx_index = index, "Ignoring late result for finished chain");
				return;
			}
			if !succeeded {
				return;
			}
		}
	}
}
