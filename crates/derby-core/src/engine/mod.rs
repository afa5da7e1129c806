//! Race engine that orchestrates the race lifecycle.
//!
//! The engine coordinates balance checks, batch preparation, per-chain race
//! tasks, completion detection and the hand-off of finished races to the
//! recorder. It is cheap to clone; clones share all state.

pub mod event_bus;
pub mod runner;

use crate::monitoring::CompletionMonitor;
use crate::state::{PhaseError, PhaseMachine, RaceSnapshot, ResultStore};
use derby_adapters::ChainAdapter;
use derby_config::RaceConfig;
use derby_storage::RecorderService;
use derby_types::{
	ChainBalance, ChainFamilyKind, ChainId, RaceEvent, RacePhase, RaceResult, RaceSessionSummary,
	ALLOWED_TRANSACTION_COUNTS,
};
use event_bus::EventBus;
use futures::future::join_all;
use runner::ChainRunner;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Errors returned by engine operations.
///
/// None of these describe a chain failing during a race; those are recorded
/// on the chain's result instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
	#[error(transparent)]
	Phase(#[from] PhaseError),
	#[error("Operation not allowed while {0}")]
	WrongPhase(RacePhase),
	#[error("Unknown chain: {0}")]
	UnknownChain(String),
	#[error("No chains selected")]
	EmptySelection,
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Timing and batch settings of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
	pub transaction_count: usize,
	pub completion_poll_interval: Duration,
	pub balance_check_interval: Duration,
	pub balance_check_delay: Duration,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self::from(&RaceConfig::default())
	}
}

impl From<&RaceConfig> for EngineSettings {
	fn from(config: &RaceConfig) -> Self {
		Self {
			transaction_count: config.transaction_count,
			completion_poll_interval: config.completion_poll_interval(),
			balance_check_interval: config.balance_check_interval(),
			balance_check_delay: config.balance_check_delay(),
		}
	}
}

/// A configured chain that could not be turned into an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedChain {
	pub id: String,
	pub reason: String,
}

type PersistenceHandle = JoinHandle<Option<RaceSessionSummary>>;

/// Main race engine.
#[derive(Clone)]
pub struct RaceEngine {
	settings: Arc<EngineSettings>,
	/// Every usable configured chain, in configuration order.
	adapters: Arc<Vec<Arc<dyn ChainAdapter>>>,
	excluded: Arc<Vec<ExcludedChain>>,
	phase: PhaseMachine,
	results: ResultStore,
	balances: Arc<arc_swap::ArcSwap<Vec<ChainBalance>>>,
	selection: Arc<arc_swap::ArcSwap<Vec<ChainId>>>,
	transaction_count: Arc<AtomicUsize>,
	event_bus: EventBus,
	recorder: Option<Arc<RecorderService>>,
	/// Handles of the current race's chain tasks.
	tasks: Arc<Mutex<Vec<(ChainId, JoinHandle<()>)>>>,
	persistence: Arc<Mutex<Option<PersistenceHandle>>>,
}

impl RaceEngine {
	/// Creates an engine racing every given chain by default.
	pub fn new(
		settings: EngineSettings,
		adapters: Vec<Arc<dyn ChainAdapter>>,
		recorder: Option<Arc<RecorderService>>,
		event_bus: EventBus,
	) -> Self {
		let selection = adapters.iter().map(|a| a.descriptor().id.clone()).collect();
		let transaction_count = settings.transaction_count;
		Self {
			settings: Arc::new(settings),
			adapters: Arc::new(adapters),
			excluded: Arc::new(Vec::new()),
			phase: PhaseMachine::new(),
			results: ResultStore::new(),
			balances: Arc::new(arc_swap::ArcSwap::from_pointee(Vec::new())),
			selection: Arc::new(arc_swap::ArcSwap::from_pointee(selection)),
			transaction_count: Arc::new(AtomicUsize::new(transaction_count)),
			event_bus,
			recorder,
			tasks: Arc::new(Mutex::new(Vec::new())),
			persistence: Arc::new(Mutex::new(None)),
		}
	}

	/// Records chains left out when the engine was built.
	pub fn with_excluded(mut self, excluded: Vec<ExcludedChain>) -> Self {
		self.excluded = Arc::new(excluded);
		self
	}

	/// Current lifecycle phase.
	pub fn phase(&self) -> RacePhase {
		self.phase.current()
	}

	/// Latest balance snapshot, one entry per configured chain.
	pub fn balances(&self) -> Vec<ChainBalance> {
		self.balances.load().as_ref().clone()
	}

	/// Results of the current or last race, ranked.
	pub fn results(&self) -> Vec<RaceResult> {
		self.results.snapshot().results.clone()
	}

	/// Results together with the race id and finish order they belong to.
	pub fn snapshot(&self) -> Arc<RaceSnapshot> {
		self.results.snapshot()
	}

	/// Chains the next race runs on, in configuration order.
	pub fn selection(&self) -> Vec<ChainId> {
		self.selection.load().as_ref().clone()
	}

	/// Transactions each chain sends per race.
	pub fn transaction_count(&self) -> usize {
		self.transaction_count.load(Ordering::SeqCst)
	}

	/// Adapters of every supported configured chain.
	pub fn adapters(&self) -> &[Arc<dyn ChainAdapter>] {
		&self.adapters
	}

	/// Configured chains that no adapter family accepted.
	pub fn excluded_chains(&self) -> &[ExcludedChain] {
		&self.excluded
	}

	/// Receives every event published after this call.
	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RaceEvent> {
		self.event_bus.subscribe()
	}

	pub(crate) fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	pub(crate) fn results_store(&self) -> &ResultStore {
		&self.results
	}

	/// Resolves once the engine reaches `target`.
	pub async fn wait_for_phase(&self, target: RacePhase) -> RacePhase {
		let mut rx = self.phase.subscribe();
		let reached = match rx.wait_for(|phase| *phase == target).await {
			Ok(phase) => *phase,
			// The sender lives as long as the engine
			Err(_) => self.phase(),
		};
		reached
	}

	/// Applies a guarded phase change and announces it.
	///
	/// Returns the previous phase, `None` if nothing changed.
	fn transition_when<G>(&self, to: RacePhase, guard: G) -> Result<Option<RacePhase>, EngineError>
	where
		G: FnOnce(RacePhase) -> bool,
	{
		let from = self.phase.transition_when(to, guard)?;
		if let Some(from) = from {
			tracing::info!(from = %from, to = %to, "Race phase changed");
			self.event_bus
				.publish(RaceEvent::PhaseChanged { from, to })
				.ok();
		}
		Ok(from)
	}

	fn require_setup_phase(&self) -> Result<(), EngineError> {
		match self.phase() {
			RacePhase::Idle | RacePhase::Funding | RacePhase::Ready => Ok(()),
			other => Err(EngineError::WrongPhase(other)),
		}
	}

	/// Replaces the chain selection. Only allowed before a race starts.
	pub fn set_selection(&self, ids: Vec<ChainId>) -> Result<(), EngineError> {
		self.require_setup_phase()?;
		let known: HashSet<&ChainId> = self.adapters.iter().map(|a| &a.descriptor().id).collect();
		if let Some(unknown) = ids.iter().find(|id| !known.contains(id)) {
			return Err(EngineError::UnknownChain(unknown.to_string()));
		}
		self.store_selection(ids);
		Ok(())
	}

	fn store_selection(&self, ids: Vec<ChainId>) {
		// Keep configuration order and drop duplicates
		let ordered: Vec<ChainId> = self
			.adapters
			.iter()
			.map(|a| a.descriptor().id.clone())
			.filter(|id| ids.contains(id))
			.collect();
		self.event_bus
			.publish(RaceEvent::SelectionChanged {
				selected: ordered.iter().map(ToString::to_string).collect(),
			})
			.ok();
		self.selection.store(Arc::new(ordered));
	}

	pub fn set_transaction_count(&self, count: usize) -> Result<(), EngineError> {
		self.require_setup_phase()?;
		if !ALLOWED_TRANSACTION_COUNTS.contains(&count) {
			return Err(EngineError::Config(format!(
				"transaction count must be one of {:?}",
				ALLOWED_TRANSACTION_COUNTS
			)));
		}
		self.transaction_count.store(count, Ordering::SeqCst);
		Ok(())
	}

	/// Reads every configured chain's balance and updates readiness.
	///
	/// Safe to call repeatedly. While racing or finished only the balance
	/// snapshot is refreshed; the phase and selection are left alone.
	pub async fn check_balances(&self) -> Result<Vec<ChainBalance>, EngineError> {
		let balances: Vec<ChainBalance> =
			join_all(self.adapters.iter().map(|adapter| adapter.check_balance())).await;

		let fundable = balances.iter().filter(|b| b.has_balance).count();
		tracing::info!(
			chains = balances.len(),
			fundable,
			"Balance check complete"
		);
		self.balances.store(Arc::new(balances.clone()));
		self.event_bus
			.publish(RaceEvent::BalancesUpdated {
				balances: balances.clone(),
			})
			.ok();

		if self.require_setup_phase().is_err() {
			return Ok(balances);
		}

		let selected = self.selection();
		match narrow_selection(&selected, &balances) {
			Some(next) => {
				if next != selected {
					tracing::info!(
						selected = selected.len(),
						funded = next.len(),
						"Narrowing selection to funded chains"
					);
					self.store_selection(next);
				}
				self.transition_when(RacePhase::Ready, is_setup_phase)?;
			},
			None => {
				self.transition_when(RacePhase::Funding, is_setup_phase)?;
			},
		}
		Ok(balances)
	}

	/// Starts a race over the selected chains.
	///
	/// Every chain's batch is prepared concurrently before any chain starts
	/// submitting, then one task per chain runs its batch. Returns the race id.
	pub async fn start_race(&self) -> Result<String, EngineError> {
		let selected = self.selection();
		if selected.is_empty() {
			return Err(EngineError::EmptySelection);
		}
		if self
			.transition_when(RacePhase::Racing, |phase| phase == RacePhase::Ready)?
			.is_none()
		{
			return Err(EngineError::WrongPhase(self.phase()));
		}

		let race_id = uuid::Uuid::new_v4().to_string();
		let count = self.transaction_count();
		let racers: Vec<Arc<dyn ChainAdapter>> = self
			.adapters
			.iter()
			.filter(|a| selected.contains(&a.descriptor().id))
			.cloned()
			.collect();

		self.results.begin(
			&race_id,
			racers
				.iter()
				.map(|a| RaceResult::pending(a.descriptor(), count))
				.collect(),
		);
		tracing::info!(
			race_id = %derby_types::truncate_id(&race_id),
			chains = racers.len(),
			transaction_count = count,
			"Starting race"
		);

		let batches = join_all(racers.iter().map(|a| a.prepare_transactions(count))).await;

		let mut handles = Vec::with_capacity(racers.len());
		for (adapter, batch) in racers.into_iter().zip(batches) {
			let chain_id = adapter.descriptor().id.clone();
			let runner = ChainRunner::new(
				adapter.clone(),
				self.results.clone(),
				self.event_bus.clone(),
				race_id.clone(),
			);
			match batch {
				Ok(batch) => {
					handles.push((chain_id, tokio::spawn(runner.run(batch))));
				},
				Err(e) => {
					let message = adapter.format_error(&e);
					tracing::warn!(
						chain_id = %chain_id,
						error = %e,
						"Failed to prepare transactions"
					);
					runner.fail(&message);
				},
			}
		}
		*self.tasks.lock().await = handles;

		let monitor = CompletionMonitor::new(
			self.clone(),
			race_id.clone(),
			self.settings.completion_poll_interval,
		);
		tokio::spawn(monitor.monitor());

		Ok(race_id)
	}

	/// Forces a still-running chain to a skipped success.
	///
	/// In-flight calls are not interrupted; their late results are ignored.
	/// Returns false when the chain had already finished.
	pub async fn skip_chain(&self, chain_id: &ChainId) -> Result<bool, EngineError> {
		match self.phase() {
			RacePhase::Racing => {},
			other => return Err(EngineError::WrongPhase(other)),
		}
		let snapshot = self.results.snapshot();
		let Some(race_id) = snapshot.race_id.as_deref() else {
			return Err(EngineError::WrongPhase(RacePhase::Racing));
		};
		if snapshot.get(chain_id).is_none() {
			return Err(EngineError::UnknownChain(chain_id.to_string()));
		}

		let changed = self.results.update(race_id, chain_id, RaceResult::skip);
		let skipped = !changed.is_empty();
		runner::publish_changes(&self.event_bus, race_id, changed);
		if skipped {
			tracing::info!(chain_id = %chain_id, "Chain skipped by user");
		}
		Ok(skipped)
	}

	/// Returns to ready after a finished race, keeping balances and selection.
	pub async fn restart(&self) -> Result<(), EngineError> {
		match self.phase() {
			RacePhase::Finished => {},
			other => return Err(EngineError::WrongPhase(other)),
		}
		self.abort_tasks().await;
		self.results.clear();
		self.transition_when(RacePhase::Ready, |phase| phase == RacePhase::Finished)?;
		Ok(())
	}

	/// Returns to idle from any phase, clearing balances and results.
	pub async fn reset(&self) -> Result<(), EngineError> {
		self.abort_tasks().await;
		self.results.clear();
		self.balances.store(Arc::new(Vec::new()));
		self.transition_when(RacePhase::Idle, |_| true)?;
		Ok(())
	}

	async fn abort_tasks(&self) {
		for (_, handle) in self.tasks.lock().await.drain(..) {
			handle.abort();
		}
	}

	/// Chains of the current race whose task has exited.
	pub(crate) async fn finished_tasks(&self) -> Vec<ChainId> {
		self.tasks
			.lock()
			.await
			.iter()
			.filter(|(_, handle)| handle.is_finished())
			.map(|(id, _)| id.clone())
			.collect()
	}

	/// Moves race `race_id` to finished and hands it to the recorder.
	///
	/// Does nothing if another race has replaced it in the meantime.
	pub(crate) async fn finish(&self, race_id: &str) -> Result<(), EngineError> {
		let snapshot = self.results.snapshot();
		if snapshot.race_id.as_deref() != Some(race_id) {
			return Ok(());
		}
		// Locked before the transition: a flush that observes Finished must find the handle
		let mut persistence = self.persistence.lock().await;
		if self
			.transition_when(RacePhase::Finished, |phase| phase == RacePhase::Racing)?
			.is_none()
		{
			return Ok(());
		}

		self.event_bus
			.publish(RaceEvent::RaceFinished {
				race_id: race_id.to_string(),
				results: snapshot.results.clone(),
			})
			.ok();

		if let Some(recorder) = self.recorder.clone() {
			let wallet = self.wallet_address(&snapshot.results);
			let count = self.transaction_count();
			let results = snapshot.results.clone();
			let handle = tokio::spawn(async move {
				match recorder.record(&wallet, count, &results).await {
					Ok(summary) => Some(summary),
					Err(e) => {
						tracing::warn!(error = %e, "Failed to save race session");
						None
					},
				}
			});
			*persistence = Some(handle);
		}
		Ok(())
	}

	/// Waits for the last race's recorder hand-off, if any.
	pub async fn flush_persistence(&self) -> Option<RaceSessionSummary> {
		let handle = self.persistence.lock().await.take()?;
		match handle.await {
			Ok(summary) => summary,
			Err(e) => {
				tracing::warn!(error = %e, "Race session task failed");
				None
			},
		}
	}

	/// Address reported with a finished race: the EVM wallet when it raced,
	/// else the first raced chain with a wallet.
	fn wallet_address(&self, results: &[RaceResult]) -> String {
		let raced: Vec<&Arc<dyn ChainAdapter>> = self
			.adapters
			.iter()
			.filter(|a| results.iter().any(|r| r.chain_id == a.descriptor().id))
			.collect();
		raced
			.iter()
			.find(|a| a.descriptor().kind() == ChainFamilyKind::Evm && a.is_wallet_ready())
			.or_else(|| raced.iter().find(|a| a.is_wallet_ready()))
			.map(|a| a.wallet_address())
			.unwrap_or_default()
	}

	/// Spawns the periodic balance check used before a race.
	///
	/// Waits the configured delay, then checks every interval while the engine
	/// is idle or funding. The task runs until aborted.
	pub fn spawn_balance_watcher(&self) -> JoinHandle<()> {
		let engine = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(engine.settings.balance_check_delay).await;
			let mut interval = tokio::time::interval(engine.settings.balance_check_interval);
			loop {
				interval.tick().await;
				if !matches!(engine.phase(), RacePhase::Idle | RacePhase::Funding) {
					continue;
				}
				if let Err(e) = engine.check_balances().await {
					tracing::warn!(error = %e, "Automatic balance check failed");
				}
			}
		})
	}
}

fn is_setup_phase(phase: RacePhase) -> bool {
	matches!(
		phase,
		RacePhase::Idle | RacePhase::Funding | RacePhase::Ready
	)
}

/// Decides the race selection after a balance check.
///
/// Keeps the selection when every selected chain is funded and narrows it to
/// its funded chains when only some are. `None` means no selected chain is
/// funded, so the race waits in funding.
pub fn narrow_selection(selected: &[ChainId], balances: &[ChainBalance]) -> Option<Vec<ChainId>> {
	let kept: Vec<ChainId> = selected
		.iter()
		.filter(|id| {
			balances
				.iter()
				.any(|b| b.has_balance && &b.chain_id == *id)
		})
		.cloned()
		.collect();
	if kept.is_empty() {
		None
	} else {
		Some(kept)
	}
}
