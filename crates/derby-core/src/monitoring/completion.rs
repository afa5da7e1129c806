//! Race completion monitoring.
//!
//! Polls the result snapshot at a fixed interval until every chain is done,
//! then finishes the race. Chain tasks are also queried through their
//! handles: a task that exited without leaving its chain terminal (it
//! panicked, for instance) has its chain marked failed so the race can still
//! finish.

use crate::engine::{runner::publish_changes, RaceEngine};
use derby_types::{truncate_id, RaceResult};
use std::time::Duration;
use tracing::instrument;

/// Error recorded on a chain whose task ended without a terminal result.
pub const TASK_ENDED_MESSAGE: &str = "Race task ended unexpectedly";

/// Watches a race until every chain is done, then finishes it.
///
/// Chains whose task has exited without a terminal result are failed with
/// [`TASK_ENDED_MESSAGE`].
pub struct CompletionMonitor {
	engine: RaceEngine,
	race_id: String,
	poll_interval: Duration,
}

impl CompletionMonitor {
	pub fn new(engine: RaceEngine, race_id: String, poll_interval: Duration) -> Self {
		Self {
			engine,
			race_id,
			poll_interval,
		}
	}

	/// Watches the race until it finishes or is replaced.
	#[instrument(skip_all, fields(race_id = %truncate_id(&self.race_id)))]
	pub async fn monitor(self) {
		let start_time = tokio::time::Instant::now();
		let mut interval = tokio::time::interval(self.poll_interval);

		loop {
			interval.tick().await;

			let snapshot = self.engine.results_store().snapshot();
			if snapshot.race_id.as_deref() != Some(self.race_id.as_str()) {
				tracing::debug!("Race replaced, stopping monitor");
				return;
			}

			if !snapshot.is_complete() {
				self.fail_orphaned_chains().await;
				continue;
			}

			tracing::info!(
				elapsed_ms = start_time.elapsed().as_millis() as u64,
				"All chains done"
			);
			if let Err(e) = self.engine.finish(&self.race_id).await {
				tracing::warn!(error = %e, "Failed to finish race");
			}
			return;
		}
	}

	async fn fail_orphaned_chains(&self) {
		for chain_id in self.engine.finished_tasks().await {
			let changed = self
				.engine
				.results_store()
				.update(&self.race_id, &chain_id, |r: &mut RaceResult| {
					r.fail(TASK_ENDED_MESSAGE)
				});
			if !changed.is_empty() {
				tracing::warn!(chain_id = %chain_id, "Chain task ended without a result");
			}
			publish_changes(self.engine.event_bus(), &self.race_id, changed);
		}
	}
}
