//! Configuration for the Chain Derby race runner.
//!
//! Configuration is a single TOML file with `${VAR}` / `${VAR:-default}`
//! environment placeholders resolved before parsing. Chains are kept as raw
//! TOML tables here; they are classified into typed descriptors when the race
//! engine is built, so one malformed chain excludes only itself.

use derby_types::{SecretString, ALLOWED_TRANSACTION_COUNTS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep only the message, not the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	#[serde(default)]
	pub race: RaceConfig,
	#[serde(default)]
	pub wallets: WalletsConfig,
	/// Where finished races are sent. No recorder means results stay local.
	pub recorder: Option<RecorderConfig>,
	#[serde(default)]
	pub geo: GeoConfig,
	/// Raw chain descriptors, classified when the engine is built.
	#[serde(default)]
	pub chains: Vec<toml::Value>,
}

/// Race timing and batch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RaceConfig {
	#[serde(default = "default_transaction_count")]
	pub transaction_count: usize,
	/// Retries after the first failed attempt of a network read.
	#[serde(default = "default_retry_count")]
	pub retry_count: u32,
	#[serde(default = "default_retry_base_delay_ms")]
	pub retry_base_delay_ms: u64,
	/// Budget for one network operation including all of its retries.
	#[serde(default = "default_operation_timeout_ms")]
	pub operation_timeout_ms: u64,
	#[serde(default = "default_completion_poll_interval_ms")]
	pub completion_poll_interval_ms: u64,
	#[serde(default = "default_balance_check_interval_seconds")]
	pub balance_check_interval_seconds: u64,
	#[serde(default = "default_balance_check_delay_ms")]
	pub balance_check_delay_ms: u64,
	/// Chain ids to race. Every configured chain when absent.
	pub selected: Option<Vec<String>>,
}

impl Default for RaceConfig {
	fn default() -> Self {
		Self {
			transaction_count: default_transaction_count(),
			retry_count: default_retry_count(),
			retry_base_delay_ms: default_retry_base_delay_ms(),
			operation_timeout_ms: default_operation_timeout_ms(),
			completion_poll_interval_ms: default_completion_poll_interval_ms(),
			balance_check_interval_seconds: default_balance_check_interval_seconds(),
			balance_check_delay_ms: default_balance_check_delay_ms(),
			selected: None,
		}
	}
}

impl RaceConfig {
	/// Budget of one network operation, retries included.
	pub fn operation_timeout(&self) -> Duration {
		Duration::from_millis(self.operation_timeout_ms)
	}

	pub fn retry_base_delay(&self) -> Duration {
		Duration::from_millis(self.retry_base_delay_ms)
	}

	pub fn completion_poll_interval(&self) -> Duration {
		Duration::from_millis(self.completion_poll_interval_ms)
	}

	pub fn balance_check_interval(&self) -> Duration {
		Duration::from_secs(self.balance_check_interval_seconds)
	}

	pub fn balance_check_delay(&self) -> Duration {
		Duration::from_millis(self.balance_check_delay_ms)
	}
}

fn default_transaction_count() -> usize {
	10
}

fn default_retry_count() -> u32 {
	3
}

fn default_retry_base_delay_ms() -> u64 {
	1000
}

fn default_operation_timeout_ms() -> u64 {
	30_000
}

fn default_completion_poll_interval_ms() -> u64 {
	1000
}

fn default_balance_check_interval_seconds() -> u64 {
	10
}

fn default_balance_check_delay_ms() -> u64 {
	500
}

/// Key material handed to the wallet provisioning step.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WalletsConfig {
	/// Hex private key for EVM chains. Blank generates an ephemeral key.
	pub evm_private_key: Option<SecretString>,
	/// Keypair shared by Solana and SOON chains, as a `solana-keygen` JSON
	/// array or base58. Blank generates an ephemeral keypair.
	pub keypair_ledger_private_key: Option<SecretString>,
	/// Owner key of a deployed Starknet account.
	pub starknet_private_key: Option<SecretString>,
	/// Address of that account. Starknet stays not ready unless both are set.
	pub starknet_account_address: Option<String>,
}

/// Race recorder selection, mirroring other pluggable implementations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeoConfig {
	#[serde(default)]
	pub enabled: bool,
	pub ipinfo_token: Option<String>,
}

/// Resolves `${VAR}` and `${VAR:-default}` placeholders.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match (std::env::var(var_name.as_str()), default_value) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)))
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Reverse order keeps earlier offsets valid
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

/// Identifier of a raw chain table as text, for duplicate detection and selection.
pub fn raw_chain_id(chain: &toml::Value) -> Option<String> {
	match chain.get("id")? {
		toml::Value::Integer(id) => Some(id.to_string()),
		toml::Value::String(id) => Some(id.clone()),
		_ => None,
	}
}

impl Config {
	/// Loads and validates a configuration file.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.chains.is_empty() {
			return Err(ConfigError::Validation(
				"At least one chain must be configured".into(),
			));
		}

		let mut seen = HashSet::new();
		for (index, chain) in self.chains.iter().enumerate() {
			let id = raw_chain_id(chain).ok_or_else(|| {
				ConfigError::Validation(format!("Chain #{} has no valid id", index))
			})?;
			if !seen.insert(id.clone()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate chain id '{}'",
					id
				)));
			}
		}

		if let Some(selected) = &self.race.selected {
			for id in selected {
				if !seen.contains(id) {
					return Err(ConfigError::Validation(format!(
						"Selected chain '{}' is not configured",
						id
					)));
				}
			}
		}

		if !ALLOWED_TRANSACTION_COUNTS.contains(&self.race.transaction_count) {
			return Err(ConfigError::Validation(format!(
				"transaction_count must be one of {:?}",
				ALLOWED_TRANSACTION_COUNTS
			)));
		}
		if self.race.retry_count > 10 {
			return Err(ConfigError::Validation(
				"retry_count cannot exceed 10".into(),
			));
		}
		if self.race.operation_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"operation_timeout_ms must be greater than 0".into(),
			));
		}
		if self.race.completion_poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"completion_poll_interval_ms must be greater than 0".into(),
			));
		}
		if self.race.balance_check_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"balance_check_interval_seconds must be greater than 0".into(),
			));
		}

		if let Some(recorder) = &self.recorder {
			if !recorder.implementations.contains_key(&recorder.primary) {
				return Err(ConfigError::Validation(format!(
					"Primary recorder '{}' not found in implementations",
					recorder.primary
				)));
			}
		}

		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const MINIMAL: &str = r#"
[[chains]]
id = 84532
name = "Base Sepolia"
rpc_url = "https://sepolia.base.org"
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("DERBY_TEST_HOST", "localhost");
		std::env::set_var("DERBY_TEST_PORT", "3001");

		let input = "url = \"http://${DERBY_TEST_HOST}:${DERBY_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "url = \"http://localhost:3001\"");

		std::env::remove_var("DERBY_TEST_HOST");
		std::env::remove_var("DERBY_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "key = \"${DERBY_MISSING_VAR:-fallback}\"\nempty = \"${DERBY_MISSING_VAR:-}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "key = \"fallback\"\nempty = \"\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("key = \"${DERBY_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("DERBY_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_apply() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.race.transaction_count, 10);
		assert_eq!(config.race.retry_count, 3);
		assert_eq!(config.race.operation_timeout(), Duration::from_secs(30));
		assert_eq!(config.race.completion_poll_interval(), Duration::from_secs(1));
		assert!(config.recorder.is_none());
		assert!(!config.geo.enabled);
		assert_eq!(config.chains.len(), 1);
	}

	#[test]
	fn test_full_config() {
		std::env::set_var("DERBY_TEST_KEY", "0x01");
		let config: Config = r#"
[race]
transaction_count = 5
selected = ["10143", "aptos-testnet"]

[wallets]
evm_private_key = "${DERBY_TEST_KEY}"
starknet_account_address = "0x04a2b3"

[recorder]
primary = "http"
[recorder.implementations.http]
base_url = "${DERBY_TEST_API:-http://localhost:3001}"
[recorder.implementations.memory]

[geo]
enabled = true

[[chains]]
id = 10143
name = "Monad Testnet"
rpc_url = "https://testnet-rpc.monad.xyz"

[[chains]]
id = "aptos-testnet"
name = "Aptos Testnet"
network = "testnet"
rpc_url = "https://fullnode.testnet.aptoslabs.com/v1"
"#
		.parse()
		.unwrap();
		std::env::remove_var("DERBY_TEST_KEY");

		assert_eq!(config.race.transaction_count, 5);
		let key = config.wallets.evm_private_key.unwrap();
		assert_eq!(key.with_exposed(|k| k.to_string()), "0x01");
		assert!(config.wallets.keypair_ledger_private_key.is_none());
		assert_eq!(
			config.wallets.starknet_account_address.as_deref(),
			Some("0x04a2b3")
		);
		let recorder = config.recorder.unwrap();
		assert_eq!(recorder.primary, "http");
		assert_eq!(
			recorder.implementations["http"]
				.get("base_url")
				.and_then(|v| v.as_str()),
			Some("http://localhost:3001")
		);
		assert!(config.geo.enabled);
	}

	#[test]
	fn test_rejects_invalid_transaction_count() {
		let input = format!("[race]\ntransaction_count = 7\n{}", MINIMAL);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("transaction_count"));
	}

	#[test]
	fn test_rejects_duplicate_chain_ids() {
		let input = format!("{}{}", MINIMAL, MINIMAL);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Duplicate chain id '84532'"));
	}

	#[test]
	fn test_rejects_unknown_selection() {
		let input = format!("[race]\nselected = [\"1\"]\n{}", MINIMAL);
		assert!(input.parse::<Config>().is_err());
	}

	#[test]
	fn test_rejects_missing_primary_recorder() {
		let input = format!(
			"[recorder]\nprimary = \"http\"\n[recorder.implementations.memory]\n{}",
			MINIMAL
		);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary recorder 'http'"));
	}

	#[test]
	fn test_rejects_empty_chain_list() {
		assert!("[race]\ntransaction_count = 5".parse::<Config>().is_err());
	}

	#[tokio::test]
	async fn test_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(MINIMAL.as_bytes()).unwrap();

		let config = Config::from_file(file.path().to_str().unwrap())
			.await
			.unwrap();
		assert_eq!(raw_chain_id(&config.chains[0]).as_deref(), Some("84532"));
	}
}
