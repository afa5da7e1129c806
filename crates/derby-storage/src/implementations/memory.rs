//! In-memory recorder.
//!
//! Keeps every session in process memory. Useful for tests and for local runs
//! where results only need to be printed.

use crate::{RecorderFactory, RecorderInterface, RecorderRegistry, StorageError};
use async_trait::async_trait;
use derby_types::{ConfigSchema, ImplementationRegistry, RaceSessionSummary, Schema, ValidationError};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cloning shares the underlying session list.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
	sessions: Arc<RwLock<Vec<RaceSessionSummary>>>,
}

impl MemoryRecorder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sessions recorded so far, oldest first.
	pub async fn sessions(&self) -> Vec<RaceSessionSummary> {
		self.sessions.read().await.clone()
	}
}

#[async_trait]
impl RecorderInterface for MemoryRecorder {
	async fn save_session(&self, summary: &RaceSessionSummary) -> Result<(), StorageError> {
		self.sessions.write().await.push(summary.clone());
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryRecorderSchema)
	}
}

/// Configuration schema for MemoryRecorder.
pub struct MemoryRecorderSchema;

impl ConfigSchema for MemoryRecorderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory recorder from configuration.
pub fn create_recorder(_config: &toml::Value) -> Result<Box<dyn RecorderInterface>, StorageError> {
	Ok(Box::new(MemoryRecorder::new()))
}

/// Registry for the memory recorder implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = RecorderFactory;

	fn factory() -> Self::Factory {
		create_recorder
	}
}

impl RecorderRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	fn summary(title: &str) -> RaceSessionSummary {
		RaceSessionSummary {
			title: title.to_string(),
			wallet_address: "0xabc".to_string(),
			transaction_count: 1,
			status: "completed".to_string(),
			city: None,
			region: None,
			country: None,
			results: vec![],
		}
	}

	#[tokio::test]
	async fn test_clones_share_sessions() {
		let recorder = MemoryRecorder::new();
		let handle = recorder.clone();

		recorder.save_session(&summary("first")).await.unwrap();
		recorder.save_session(&summary("second")).await.unwrap();

		let titles: Vec<String> = handle.sessions().await.into_iter().map(|s| s.title).collect();
		assert_eq!(titles, vec!["first", "second"]);
	}

	#[test]
	fn test_schema_accepts_empty_table() {
		let config = toml::Value::Table(toml::map::Map::new());
		assert!(MemoryRecorderSchema.validate(&config).is_ok());
	}
}
