//! Chain descriptors and family classification.
//!
//! Chains are declared in configuration as loosely-shaped TOML tables. This
//! module turns each table into a [`ChainDescriptor`] carrying an explicit
//! [`ChainFamily`] variant, so that everything downstream matches on a closed
//! set of families instead of re-inspecting descriptor shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default keypair-ledger endpoints by cluster name.
const CLUSTER_ENDPOINTS: &[(&str, &str)] = &[
	("mainnet-beta", "https://api.mainnet-beta.solana.com"),
	("devnet", "https://api.devnet.solana.com"),
	("testnet", "https://api.testnet.solana.com"),
];

/// STRK fee token, identical on Starknet mainnet and sepolia.
pub const DEFAULT_FEE_TOKEN: &str =
	"0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d";

/// Errors raised while classifying a raw chain descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
	#[error("Unsupported chain type: {0}")]
	Unsupported(String),
	#[error("Missing field '{field}' for chain {chain}")]
	MissingField { chain: String, field: String },
	#[error("Invalid field '{field}' for chain {chain}: {message}")]
	InvalidField {
		chain: String,
		field: String,
		message: String,
	},
}

/// Identifier of a race participant.
///
/// EVM chains are identified by their numeric chain id, every other family
/// by a string such as `aptos-testnet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainId {
	Numeric(u64),
	Named(String),
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChainId::Numeric(id) => write!(f, "{}", id),
			ChainId::Named(id) => write!(f, "{}", id),
		}
	}
}

impl ChainId {
	/// SOON rollups share the keypair ledger family under `soon-` ids.
	pub fn is_soon(&self) -> bool {
		matches!(self, ChainId::Named(id) if id.starts_with("soon-"))
	}
}

impl From<u64> for ChainId {
	fn from(id: u64) -> Self {
		ChainId::Numeric(id)
	}
}

impl From<&str> for ChainId {
	fn from(id: &str) -> Self {
		ChainId::Named(id.to_string())
	}
}

/// Network layer of a chain, presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layer {
	L1,
	L2,
}

/// Discriminant of [`ChainFamily`], used for registry lookup and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamilyKind {
	Evm,
	KeypairLedger,
	UtxoChange,
	AccountSequence,
	ContractCall,
}

impl ChainFamilyKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ChainFamilyKind::Evm => "evm",
			ChainFamilyKind::KeypairLedger => "keypair_ledger",
			ChainFamilyKind::UtxoChange => "utxo_change",
			ChainFamilyKind::AccountSequence => "account_sequence",
			ChainFamilyKind::ContractCall => "contract_call",
		}
	}

	/// Smallest balance, in base units, that is still NOT enough to race.
	///
	/// A chain is fundable only when its balance is strictly greater.
	pub fn default_min_balance(&self) -> u128 {
		match self {
			ChainFamilyKind::Evm => 100_000_000_000_000,
			ChainFamilyKind::KeypairLedger => 1_000_000,
			ChainFamilyKind::UtxoChange => 1_000_000,
			ChainFamilyKind::AccountSequence => 100_000,
			ChainFamilyKind::ContractCall => 20_000_000_000_000_000,
		}
	}

	fn parse(value: &str) -> Option<Self> {
		match value {
			"evm" => Some(ChainFamilyKind::Evm),
			"keypair_ledger" => Some(ChainFamilyKind::KeypairLedger),
			"utxo_change" => Some(ChainFamilyKind::UtxoChange),
			"account_sequence" => Some(ChainFamilyKind::AccountSequence),
			"contract_call" => Some(ChainFamilyKind::ContractCall),
			_ => None,
		}
	}
}

impl fmt::Display for ChainFamilyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How an EVM chain accepts signed transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvmSubmission {
	/// `eth_sendRawTransaction` followed by receipt polling.
	Standard,
	/// `eth_sendRawTransactionSync`, returns the receipt.
	Sync,
	/// `realtime_sendRawTransaction`, returns the receipt.
	Realtime,
}

impl EvmSubmission {
	/// Submission path a chain uses when the descriptor does not name one.
	fn default_for(chain_id: u64) -> Self {
		match chain_id {
			11155931 => EvmSubmission::Sync,
			6342 => EvmSubmission::Realtime,
			_ => EvmSubmission::Standard,
		}
	}
}

/// Confirmation level requested from keypair-ledger nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
	Processed,
	#[default]
	Confirmed,
	Finalized,
}

impl Commitment {
	pub fn as_str(&self) -> &'static str {
		match self {
			Commitment::Processed => "processed",
			Commitment::Confirmed => "confirmed",
			Commitment::Finalized => "finalized",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmChain {
	pub chain_id: u64,
	pub rpc_url: String,
	pub submission: EvmSubmission,
	pub fallback_gas_price_wei: Option<u128>,
}

impl EvmChain {
	/// Gas price used when the node cannot report one.
	pub fn fallback_gas_price(&self) -> u128 {
		const GWEI: u128 = 1_000_000_000;
		self.fallback_gas_price_wei.unwrap_or(match self.chain_id {
			10143 => 60 * GWEI,
			8453 => 2 * GWEI,
			17180 => 3 * GWEI / 2,
			6342 => 3 * GWEI,
			_ => GWEI,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypairLedgerChain {
	/// Endpoints in preference order, never empty.
	pub endpoints: Vec<String>,
	pub commitment: Commitment,
	/// Send a freshly built transfer when the pre-signed one fails.
	pub fallback_send: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoChangeChain {
	pub rpc_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSequenceChain {
	pub network: String,
	pub rpc_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCallChain {
	pub rpc_url: String,
	pub fee_token: String,
}

/// Family-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFamily {
	Evm(EvmChain),
	KeypairLedger(KeypairLedgerChain),
	UtxoChange(UtxoChangeChain),
	AccountSequence(AccountSequenceChain),
	ContractCall(ContractCallChain),
}

impl ChainFamily {
	pub fn kind(&self) -> ChainFamilyKind {
		match self {
			ChainFamily::Evm(_) => ChainFamilyKind::Evm,
			ChainFamily::KeypairLedger(_) => ChainFamilyKind::KeypairLedger,
			ChainFamily::UtxoChange(_) => ChainFamilyKind::UtxoChange,
			ChainFamily::AccountSequence(_) => ChainFamilyKind::AccountSequence,
			ChainFamily::ContractCall(_) => ChainFamilyKind::ContractCall,
		}
	}
}

/// Static configuration of one race participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
	pub id: ChainId,
	pub name: String,
	pub color: Option<String>,
	pub logo: Option<String>,
	pub testnet: bool,
	pub layer: Option<Layer>,
	/// Overrides the family threshold in [`ChainFamilyKind::default_min_balance`].
	pub min_balance: Option<u128>,
	pub family: ChainFamily,
}

impl ChainDescriptor {
	pub fn kind(&self) -> ChainFamilyKind {
		self.family.kind()
	}

	/// Configured override of the family funding threshold, if any.
	pub fn min_balance(&self) -> u128 {
		self.min_balance
			.unwrap_or_else(|| self.kind().default_min_balance())
	}

	/// Classifies a raw descriptor table and builds the typed descriptor.
	///
	/// Markers are checked in a fixed order: an explicit `family` key, a
	/// numeric id, a `cluster` key, then the `soon-`, `fuel-`, `aptos-` and
	/// `starknet-` id prefixes. A descriptor matching none of them is
	/// rejected rather than guessed.
	pub fn from_raw(raw: &toml::Value) -> Result<Self, DescriptorError> {
		let reader = RawReader::new(raw)?;
		let kind = reader.classify()?;
		let family = match kind {
			ChainFamilyKind::Evm => ChainFamily::Evm(reader.evm()?),
			ChainFamilyKind::KeypairLedger => ChainFamily::KeypairLedger(reader.keypair_ledger()?),
			ChainFamilyKind::UtxoChange => ChainFamily::UtxoChange(UtxoChangeChain {
				rpc_url: reader.required_str("rpc_url")?.to_string(),
			}),
			ChainFamilyKind::AccountSequence => {
				ChainFamily::AccountSequence(AccountSequenceChain {
					network: reader.required_str("network")?.to_string(),
					rpc_url: reader.required_str("rpc_url")?.to_string(),
				})
			},
			ChainFamilyKind::ContractCall => ChainFamily::ContractCall(ContractCallChain {
				rpc_url: reader.required_str("rpc_url")?.to_string(),
				fee_token: reader
					.optional_str("fee_token")
					.unwrap_or(DEFAULT_FEE_TOKEN)
					.to_string(),
			}),
		};

		Ok(ChainDescriptor {
			id: reader.id.clone(),
			name: reader.name.clone(),
			color: reader.optional_str("color").map(str::to_string),
			logo: reader.optional_str("logo").map(str::to_string),
			testnet: reader
				.table
				.get("testnet")
				.and_then(|v| v.as_bool())
				.unwrap_or(false),
			layer: reader.layer()?,
			min_balance: reader.optional_amount("min_balance")?,
			family,
		})
	}
}

/// Field access helpers over a raw descriptor table.
struct RawReader<'a> {
	table: &'a toml::Table,
	id: ChainId,
	name: String,
}

impl<'a> RawReader<'a> {
	fn new(raw: &'a toml::Value) -> Result<Self, DescriptorError> {
		let table = raw
			.as_table()
			.ok_or_else(|| DescriptorError::Unsupported(raw.to_string()))?;

		let name = table.get("name").and_then(|v| v.as_str());
		let id = match table.get("id") {
			Some(toml::Value::Integer(id)) if *id >= 0 => ChainId::Numeric(*id as u64),
			Some(toml::Value::String(id)) => ChainId::Named(id.clone()),
			_ => {
				return Err(DescriptorError::MissingField {
					chain: name.unwrap_or("<unnamed>").to_string(),
					field: "id".to_string(),
				})
			},
		};
		let name = name.map(str::to_string).unwrap_or_else(|| id.to_string());

		Ok(Self { table, id, name })
	}

	fn classify(&self) -> Result<ChainFamilyKind, DescriptorError> {
		if let Some(family) = self.optional_str("family") {
			return ChainFamilyKind::parse(family).ok_or_else(|| self.invalid("family", family));
		}

		let named = match &self.id {
			ChainId::Numeric(_) => return Ok(ChainFamilyKind::Evm),
			ChainId::Named(id) => id.as_str(),
		};

		if self.table.contains_key("cluster") || named.starts_with("soon-") {
			Ok(ChainFamilyKind::KeypairLedger)
		} else if named.starts_with("fuel-") || self.name.starts_with("Fuel") {
			Ok(ChainFamilyKind::UtxoChange)
		} else if named.starts_with("aptos-") {
			Ok(ChainFamilyKind::AccountSequence)
		} else if named.starts_with("starknet-") {
			Ok(ChainFamilyKind::ContractCall)
		} else {
			Err(DescriptorError::Unsupported(self.name.clone()))
		}
	}

	fn evm(&self) -> Result<EvmChain, DescriptorError> {
		let chain_id = match &self.id {
			ChainId::Numeric(id) => *id,
			ChainId::Named(_) => match self.table.get("chain_id").and_then(|v| v.as_integer()) {
				Some(id) if id >= 0 => id as u64,
				_ => return Err(self.missing("chain_id")),
			},
		};

		let submission = match self.optional_str("submission") {
			None => EvmSubmission::default_for(chain_id),
			Some("standard") => EvmSubmission::Standard,
			Some("sync") => EvmSubmission::Sync,
			Some("realtime") => EvmSubmission::Realtime,
			Some(other) => return Err(self.invalid("submission", other)),
		};

		Ok(EvmChain {
			chain_id,
			rpc_url: self.required_str("rpc_url")?.to_string(),
			submission,
			fallback_gas_price_wei: self.optional_amount("fallback_gas_price_wei")?,
		})
	}

	fn keypair_ledger(&self) -> Result<KeypairLedgerChain, DescriptorError> {
		let mut endpoints: Vec<String> = Vec::new();
		let mut push = |url: &str| {
			if !endpoints.iter().any(|e| e == url) {
				endpoints.push(url.to_string());
			}
		};

		if let Some(url) = self.optional_str("rpc_url") {
			push(url);
		}
		if let Some(urls) = self.table.get("fallback_rpc_urls").and_then(|v| v.as_array()) {
			for url in urls.iter().filter_map(|v| v.as_str()) {
				push(url);
			}
		}
		if let Some(cluster) = self.optional_str("cluster") {
			if let Some((_, url)) = CLUSTER_ENDPOINTS.iter().find(|(c, _)| *c == cluster) {
				push(url);
			}
		}

		if endpoints.is_empty() {
			return Err(self.missing("rpc_url"));
		}

		let commitment = match self.optional_str("commitment") {
			None => Commitment::default(),
			Some("processed") => Commitment::Processed,
			Some("confirmed") => Commitment::Confirmed,
			Some("finalized") => Commitment::Finalized,
			Some(other) => return Err(self.invalid("commitment", other)),
		};

		let fallback_send = self
			.table
			.get("fallback_send")
			.and_then(|v| v.as_bool())
			.unwrap_or(!self.id.is_soon());

		Ok(KeypairLedgerChain {
			endpoints,
			commitment,
			fallback_send,
		})
	}

	fn layer(&self) -> Result<Option<Layer>, DescriptorError> {
		match self.optional_str("layer") {
			None => Ok(None),
			Some("L1") => Ok(Some(Layer::L1)),
			Some("L2") => Ok(Some(Layer::L2)),
			Some(other) => Err(self.invalid("layer", other)),
		}
	}

	fn optional_str(&self, field: &str) -> Option<&'a str> {
		self.table.get(field).and_then(|v| v.as_str())
	}

	fn required_str(&self, field: &str) -> Result<&'a str, DescriptorError> {
		self.optional_str(field)
			.filter(|s| !s.is_empty())
			.ok_or_else(|| self.missing(field))
	}

	/// Reads a base-unit amount given either as an integer or a decimal string.
	fn optional_amount(&self, field: &str) -> Result<Option<u128>, DescriptorError> {
		match self.table.get(field) {
			None => Ok(None),
			Some(toml::Value::Integer(v)) if *v >= 0 => Ok(Some(*v as u128)),
			Some(toml::Value::String(s)) => s
				.parse::<u128>()
				.map(Some)
				.map_err(|e| self.invalid(field, &e.to_string())),
			Some(other) => Err(self.invalid(field, &other.to_string())),
		}
	}

	fn missing(&self, field: &str) -> DescriptorError {
		DescriptorError::MissingField {
			chain: self.name.clone(),
			field: field.to_string(),
		}
	}

	fn invalid(&self, field: &str, message: &str) -> DescriptorError {
		DescriptorError::InvalidField {
			chain: self.name.clone(),
			field: field.to_string(),
			message: message.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(raw: &str) -> Result<ChainDescriptor, DescriptorError> {
		let value: toml::Value = toml::from_str(raw).unwrap();
		ChainDescriptor::from_raw(&value)
	}

	#[test]
	fn test_numeric_id_is_evm() {
		let descriptor = parse(
			r#"
			id = 10143
			name = "Monad Testnet"
			rpc_url = "https://testnet-rpc.monad.xyz"
			layer = "L1"
			testnet = true
		"#,
		)
		.unwrap();

		assert_eq!(descriptor.id, ChainId::Numeric(10143));
		assert_eq!(descriptor.layer, Some(Layer::L1));
		assert!(descriptor.testnet);
		match descriptor.family {
			ChainFamily::Evm(evm) => {
				assert_eq!(evm.submission, EvmSubmission::Standard);
				assert_eq!(evm.fallback_gas_price(), 60_000_000_000);
			},
			other => panic!("unexpected family {:?}", other),
		}
	}

	#[test]
	fn test_known_evm_chains_default_submission() {
		let rise = parse(r#"id = 11155931
			name = "RISE Testnet"
			rpc_url = "https://testnet.riselabs.xyz""#)
		.unwrap();
		let mega = parse(r#"id = 6342
			name = "MegaETH Testnet"
			rpc_url = "https://carrot.megaeth.com/rpc""#)
		.unwrap();

		assert!(matches!(rise.family, ChainFamily::Evm(EvmChain { submission: EvmSubmission::Sync, .. })));
		assert!(matches!(mega.family, ChainFamily::Evm(EvmChain { submission: EvmSubmission::Realtime, .. })));
	}

	#[test]
	fn test_cluster_is_keypair_ledger_with_fallbacks() {
		let descriptor = parse(
			r#"
			id = "solana-testnet"
			name = "Solana Testnet"
			cluster = "testnet"
			rpc_url = "https://solana-testnet.example.org"
			commitment = "finalized"
		"#,
		)
		.unwrap();

		match descriptor.family {
			ChainFamily::KeypairLedger(chain) => {
				assert_eq!(
					chain.endpoints,
					vec![
						"https://solana-testnet.example.org".to_string(),
						"https://api.testnet.solana.com".to_string()
					]
				);
				assert_eq!(chain.commitment, Commitment::Finalized);
				assert!(chain.fallback_send);
			},
			other => panic!("unexpected family {:?}", other),
		}
	}

	#[test]
	fn test_soon_prefix_disables_fallback_send() {
		let descriptor = parse(
			r#"
			id = "soon-testnet"
			name = "SOON Testnet"
			rpc_url = "https://rpc.testnet.soo.network/rpc"
		"#,
		)
		.unwrap();

		match descriptor.family {
			ChainFamily::KeypairLedger(chain) => {
				assert_eq!(chain.endpoints.len(), 1);
				assert!(!chain.fallback_send);
			},
			other => panic!("unexpected family {:?}", other),
		}
	}

	#[test]
	fn test_prefixes_classify_remaining_families() {
		let fuel = parse(r#"id = "fuel-testnet"
			name = "Fuel Testnet"
			rpc_url = "https://testnet.fuel.network/v1/graphql""#)
		.unwrap();
		let aptos = parse(r#"id = "aptos-testnet"
			name = "Aptos Testnet"
			network = "testnet"
			rpc_url = "https://fullnode.testnet.aptoslabs.com/v1""#)
		.unwrap();
		let starknet = parse(r#"id = "starknet-testnet"
			name = "Starknet Sepolia"
			rpc_url = "https://starknet-sepolia.public.blastapi.io""#)
		.unwrap();

		assert_eq!(fuel.kind(), ChainFamilyKind::UtxoChange);
		assert_eq!(aptos.kind(), ChainFamilyKind::AccountSequence);
		assert_eq!(starknet.kind(), ChainFamilyKind::ContractCall);
		assert_eq!(starknet.min_balance(), 20_000_000_000_000_000);
	}

	#[test]
	fn test_explicit_family_wins() {
		let descriptor = parse(
			r#"
			id = "eclipse-testnet"
			name = "Eclipse Testnet"
			family = "keypair_ledger"
			rpc_url = "https://testnet.dev2.eclipsenetwork.xyz"
			min_balance = "5000000"
		"#,
		)
		.unwrap();

		assert_eq!(descriptor.kind(), ChainFamilyKind::KeypairLedger);
		assert_eq!(descriptor.min_balance(), 5_000_000);
	}

	#[test]
	fn test_unrecognised_descriptor_is_rejected() {
		let err = parse(r#"id = "cosmoshub-4"
			name = "Cosmos Hub""#)
		.unwrap_err();
		assert_eq!(err, DescriptorError::Unsupported("Cosmos Hub".to_string()));
	}

	#[test]
	fn test_missing_family_field() {
		let err = parse(r#"id = "aptos-testnet"
			name = "Aptos Testnet"
			rpc_url = "https://fullnode.testnet.aptoslabs.com/v1""#)
		.unwrap_err();
		assert!(matches!(err, DescriptorError::MissingField { ref field, .. } if field == "network"));
	}

	#[test]
	fn test_chain_id_display_and_serde() {
		assert_eq!(ChainId::from(8453).to_string(), "8453");
		assert_eq!(ChainId::from("aptos-mainnet").to_string(), "aptos-mainnet");
		assert_eq!(serde_json::to_string(&ChainId::from(1)).unwrap(), "1");
		assert_eq!(
			serde_json::to_string(&ChainId::from("soon-mainnet")).unwrap(),
			"\"soon-mainnet\""
		);
	}

	#[test]
	fn test_soon_ids() {
		assert!(ChainId::from("soon-testnet").is_soon());
		assert!(!ChainId::from("solana-testnet").is_soon());
		assert!(!ChainId::from(50311).is_soon());
	}
}
