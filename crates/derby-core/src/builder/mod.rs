//! Builder for constructing race engines.
//!
//! Turns a [`Config`] into a [`RaceEngine`]: every raw chain descriptor is
//! classified and handed to the adapter factory, and the configured recorder
//! implementations are created through their factories. A chain that cannot
//! be classified is excluded with a warning instead of aborting the build.

use crate::engine::{event_bus::EventBus, EngineSettings, ExcludedChain, RaceEngine};
use derby_adapters::{AdapterFactory, ChainAdapter};
use derby_config::{raw_chain_id, Config};
use derby_storage::{IpInfoLocator, RecorderInterface, RecorderService, StorageError};
use derby_types::ChainId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Builder for constructing a RaceEngine with pluggable implementations.
pub struct RaceBuilder {
	config: Config,
}

impl RaceBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine.
	///
	/// `recorder_factories` maps implementation names to factories; only the
	/// names present in the recorder configuration are instantiated.
	pub fn build<RF>(
		self,
		adapters: &AdapterFactory,
		recorder_factories: HashMap<String, RF>,
	) -> Result<RaceEngine, BuilderError>
	where
		RF: Fn(&toml::Value) -> Result<Box<dyn RecorderInterface>, StorageError>,
	{
		let mut chains: Vec<Arc<dyn ChainAdapter>> = Vec::new();
		let mut excluded = Vec::new();
		for (index, raw) in self.config.chains.iter().enumerate() {
			let id = raw_chain_id(raw).unwrap_or_else(|| format!("#{}", index));
			match adapters.create_from_raw(raw) {
				Ok(adapter) => {
					tracing::info!(
						component = "chain",
						chain_id = %id,
						family = %adapter.descriptor().kind(),
						wallet_ready = adapter.is_wallet_ready(),
						"Loaded"
					);
					chains.push(adapter);
				},
				Err(e) => {
					tracing::warn!(
						component = "chain",
						chain_id = %id,
						error = %e,
						"Excluding chain"
					);
					excluded.push(ExcludedChain {
						id,
						reason: e.to_string(),
					});
				},
			}
		}

		if chains.is_empty() {
			return Err(BuilderError::Config(
				"No supported chains configured".into(),
			));
		}

		let recorder = self.build_recorder(recorder_factories)?;
		let selection = self.selection(&chains);

		let engine = RaceEngine::new(
			EngineSettings::from(&self.config.race),
			chains,
			recorder,
			EventBus::default(),
		)
		.with_excluded(excluded);
		engine
			.set_selection(selection)
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		Ok(engine)
	}

	fn build_recorder<RF>(
		&self,
		factories: HashMap<String, RF>,
	) -> Result<Option<Arc<RecorderService>>, BuilderError>
	where
		RF: Fn(&toml::Value) -> Result<Box<dyn RecorderInterface>, StorageError>,
	{
		let Some(recorder_config) = &self.config.recorder else {
			tracing::info!(component = "recorder", "No recorder configured, results stay local");
			return Ok(None);
		};

		let mut implementations = HashMap::new();
		for (name, config) in &recorder_config.implementations {
			let Some(factory) = factories.get(name) else {
				tracing::warn!(component = "recorder", implementation = %name, "Unknown implementation");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					let is_primary = &recorder_config.primary == name;
					tracing::info!(component = "recorder", implementation = %name, enabled = %is_primary, "Loaded");
					implementations.insert(name.clone(), implementation);
				},
				Err(e) => {
					tracing::error!(
						component = "recorder",
						implementation = %name,
						error = %e,
						"Failed to create recorder implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create recorder implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		let backend = implementations
			.remove(&recorder_config.primary)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"Primary recorder '{}' failed to load",
					recorder_config.primary
				))
			})?;

		let mut service = RecorderService::new(backend);
		if self.config.geo.enabled {
			service = service.with_locator(Arc::new(IpInfoLocator::new(
				self.config.geo.ipinfo_token.clone(),
			)));
		}
		Ok(Some(Arc::new(service)))
	}

	/// Configured selection restricted to loaded chains; every chain if unset.
	fn selection(&self, chains: &[Arc<dyn ChainAdapter>]) -> Vec<ChainId> {
		let loaded = chains.iter().map(|c| c.descriptor().id.clone());
		match &self.config.race.selected {
			None => loaded.collect(),
			Some(selected) => {
				for id in selected {
					if !chains.iter().any(|c| &c.descriptor().id.to_string() == id) {
						tracing::warn!(chain_id = %id, "Selected chain was excluded");
					}
				}
				loaded
					.filter(|id| selected.contains(&id.to_string()))
					.collect()
			},
		}
	}
}
