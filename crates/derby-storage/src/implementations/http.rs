//! HTTP recorder posting race sessions to the analytics API.
//!
//! Each finished race becomes one `POST {base_url}/api/race-sessions` with the
//! camelCase session summary as its JSON body.

use crate::{RecorderFactory, RecorderInterface, RecorderRegistry, StorageError};
use async_trait::async_trait;
use derby_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, RaceSessionSummary, Schema,
	ValidationError,
};
use std::time::Duration;

const SESSIONS_PATH: &str = "/api/race-sessions";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Recorder posting sessions to the analytics API.
pub struct HttpRecorder {
	client: reqwest::Client,
	endpoint: String,
}

impl HttpRecorder {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StorageError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| StorageError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			endpoint: format!("{}{}", base_url.trim_end_matches('/'), SESSIONS_PATH),
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}

#[async_trait]
impl RecorderInterface for HttpRecorder {
	async fn save_session(&self, summary: &RaceSessionSummary) -> Result<(), StorageError> {
		let response = self
			.client
			.post(&self.endpoint)
			.json(summary)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					StorageError::Backend(
						"Request timed out - analytics server may be unavailable".to_string(),
					)
				} else if e.is_connect() {
					StorageError::Backend(
						"Unable to connect to analytics server - network or server issue"
							.to_string(),
					)
				} else {
					StorageError::Backend(e.to_string())
				}
			})?;

		let status = response.status();
		if !status.is_success() {
			let body = response
				.text()
				.await
				.unwrap_or_else(|_| "Unknown error".to_string());
			return Err(StorageError::Backend(format!(
				"API responded with {}: {}",
				status.as_u16(),
				body
			)));
		}
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpRecorderSchema)
	}
}

/// Configuration schema for HttpRecorder.
pub struct HttpRecorderSchema;

impl ConfigSchema for HttpRecorderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("base_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						_ => Err("base_url must be an http(s) URL".to_string()),
					}
				}),
			],
			vec![Field::new(
				"timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(300),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create an HTTP recorder from configuration.
///
/// Configuration parameters:
/// - `base_url`: root of the analytics API (required)
/// - `timeout_seconds`: request timeout, default 10
pub fn create_recorder(config: &toml::Value) -> Result<Box<dyn RecorderInterface>, StorageError> {
	HttpRecorderSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("base_url is required".to_string()))?;
	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpRecorder::new(
		base_url,
		Duration::from_secs(timeout_seconds),
	)?))
}

/// Registry for the HTTP recorder implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = RecorderFactory;

	fn factory() -> Self::Factory {
		create_recorder
	}
}

impl RecorderRegistry for Registry {}
