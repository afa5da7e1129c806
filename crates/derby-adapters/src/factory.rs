//! Adapter construction from chain descriptors.
//!
//! Classification into a family happens once, when the raw descriptor is
//! parsed into a [`ChainDescriptor`]. The factory then looks up the family's
//! registered constructor by name. A descriptor that matches no family is an
//! error; the factory never guesses.

use crate::{AdapterError, ChainAdapter, RetryPolicy, WalletStates};
use derby_types::{ChainDescriptor, DescriptorError, ImplementationRegistry};
use std::collections::HashMap;
use std::sync::Arc;

/// Type alias for adapter factory functions.
pub type ChainAdapterFactory =
	fn(ChainDescriptor, &WalletStates, RetryPolicy) -> Result<Arc<dyn ChainAdapter>, AdapterError>;

/// Registry trait for adapter implementations, keyed by family name.
pub trait ChainAdapterRegistry: ImplementationRegistry<Factory = ChainAdapterFactory> {}

/// Get all registered adapter implementations.
///
/// Returns a vector of (family name, factory function) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, ChainAdapterFactory)> {
	use crate::implementations::{
		account_sequence, contract_call, evm, keypair_ledger, utxo_change,
	};

	vec![
		(evm::adapter::Registry::NAME, evm::adapter::Registry::factory()),
		(keypair_ledger::Registry::NAME, keypair_ledger::Registry::factory()),
		(utxo_change::Registry::NAME, utxo_change::Registry::factory()),
		(account_sequence::Registry::NAME, account_sequence::Registry::factory()),
		(contract_call::Registry::NAME, contract_call::Registry::factory()),
	]
}

/// Builds adapters for descriptors, sharing one wallet bundle and retry policy.
#[derive(Clone)]
pub struct AdapterFactory {
	wallets: WalletStates,
	policy: RetryPolicy,
	factories: HashMap<&'static str, ChainAdapterFactory>,
}

impl AdapterFactory {
	pub fn new(wallets: WalletStates, policy: RetryPolicy) -> Self {
		Self {
			wallets,
			policy,
			factories: get_all_implementations().into_iter().collect(),
		}
	}

	/// Constructs the adapter of the descriptor's family.
	pub fn create(&self, descriptor: ChainDescriptor) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
		let family = descriptor.kind().as_str();
		let factory = self.factories.get(family).ok_or_else(|| {
			AdapterError::UnsupportedChain(format!(
				"No adapter registered for family {} ({})",
				family, descriptor.id
			))
		})?;
		factory(descriptor, &self.wallets, self.policy)
	}

	/// Classifies a raw descriptor and constructs its adapter.
	pub fn create_from_raw(&self, raw: &toml::Value) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
		let descriptor = ChainDescriptor::from_raw(raw).map_err(|e| match e {
			DescriptorError::Unsupported(chain) => AdapterError::UnsupportedChain(chain),
			other => AdapterError::UnsupportedChain(other.to_string()),
		})?;
		self.create(descriptor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::ChainFamilyKind;

	fn factory() -> AdapterFactory {
		AdapterFactory::new(WalletStates::default(), RetryPolicy::default())
	}

	fn raw(text: &str) -> toml::Value {
		toml::from_str(text).unwrap()
	}

	#[test]
	fn test_every_family_is_registered() {
		let names: Vec<&str> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		for kind in [
			ChainFamilyKind::Evm,
			ChainFamilyKind::KeypairLedger,
			ChainFamilyKind::UtxoChange,
			ChainFamilyKind::AccountSequence,
			ChainFamilyKind::ContractCall,
		] {
			assert!(names.contains(&kind.as_str()), "{} not registered", kind);
		}
	}

	#[test]
	fn test_creates_adapter_per_family() {
		let factory = factory();
		let cases = [
			("id = 84532\nname = \"Base Sepolia\"\nrpc_url = \"https://sepolia.base.org\"", ChainFamilyKind::Evm),
			("id = \"solana-testnet\"\nname = \"Solana\"\ncluster = \"testnet\"", ChainFamilyKind::KeypairLedger),
			("id = \"fuel-testnet\"\nname = \"Fuel\"\nrpc_url = \"http://fuel\"", ChainFamilyKind::UtxoChange),
			("id = \"aptos-testnet\"\nname = \"Aptos\"\nnetwork = \"testnet\"\nrpc_url = \"http://aptos\"", ChainFamilyKind::AccountSequence),
			("id = \"starknet-testnet\"\nname = \"Starknet\"\nrpc_url = \"http://starknet\"", ChainFamilyKind::ContractCall),
		];

		for (text, kind) in cases {
			let adapter = factory.create_from_raw(&raw(text)).unwrap();
			assert_eq!(adapter.descriptor().kind(), kind);
			assert!(!adapter.is_wallet_ready());
		}
	}

	#[test]
	fn test_unrecognised_chain_fails_loudly() {
		let result = factory().create_from_raw(&raw("id = \"cosmos-hub\"\nname = \"Cosmos\""));
		match result {
			Err(AdapterError::UnsupportedChain(chain)) => assert_eq!(chain, "Cosmos"),
			Err(other) => panic!("unexpected error {:?}", other),
			Ok(_) => panic!("unrecognised chain must not produce an adapter"),
		}
	}

	#[test]
	fn test_malformed_descriptor_is_rejected() {
		let result = factory().create_from_raw(&raw("id = 1\nname = \"Mainnet\""));
		assert!(matches!(result, Err(AdapterError::UnsupportedChain(_))));
	}
}
