//! Persistence collaborators for finished races.
//!
//! A recorder receives one [`RaceSessionSummary`] per finished race. Delivery
//! is best-effort: callers log failures and never let them affect the race
//! outcome. Recorders are pluggable through the same factory registry used
//! for chain adapters.

use async_trait::async_trait;
use chrono::Utc;
use derby_types::{ConfigSchema, GeoInfo, ImplementationRegistry, RaceResult, RaceSessionSummary};
use std::sync::Arc;
use thiserror::Error;

pub mod geo;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod memory;
}

pub use geo::{GeoLocator, IpInfoLocator};

/// Errors that can occur while recording a race.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs during serialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the recorder backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for race recorders.
#[async_trait]
pub trait RecorderInterface: Send + Sync {
	/// Persists one finished race.
	async fn save_session(&self, summary: &RaceSessionSummary) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for recorder factory functions.
pub type RecorderFactory = fn(&toml::Value) -> Result<Box<dyn RecorderInterface>, StorageError>;

/// Registry trait for recorder implementations.
pub trait RecorderRegistry: ImplementationRegistry<Factory = RecorderFactory> {}

/// Get all registered recorder implementations.
///
/// Returns a vector of (name, factory) tuples for all available recorders.
pub fn get_all_implementations() -> Vec<(&'static str, RecorderFactory)> {
	use implementations::{http, memory};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Builds session summaries and hands them to the configured recorder.
pub struct RecorderService {
	backend: Box<dyn RecorderInterface>,
	locator: Option<Arc<dyn GeoLocator>>,
}

impl RecorderService {
	pub fn new(backend: Box<dyn RecorderInterface>) -> Self {
		Self {
			backend,
			locator: None,
		}
	}

	/// Attaches a geolocation lookup performed once per recorded race.
	pub fn with_locator(mut self, locator: Arc<dyn GeoLocator>) -> Self {
		self.locator = Some(locator);
		self
	}

	/// Summarizes `results` and saves the summary.
	///
	/// Returns the summary that was sent.
	pub async fn record(
		&self,
		wallet_address: &str,
		transaction_count: usize,
		results: &[RaceResult],
	) -> Result<RaceSessionSummary, StorageError> {
		let geo = match &self.locator {
			Some(locator) => locator.locate().await,
			None => GeoInfo::default(),
		};
		let summary = RaceSessionSummary::from_results(
			wallet_address,
			transaction_count,
			results,
			geo,
			Utc::now(),
		);
		self.backend.save_session(&summary).await?;
		tracing::info!(
			chains = summary.results.len(),
			transaction_count,
			"Recorded race session"
		);
		Ok(summary)
	}
}
