//! Wallet provisioning.
//!
//! Builds the per-family wallet bundle handed to the adapter factory. The EVM
//! and keypair ledger wallets come from their configured keys, or from freshly
//! generated ones when no key is set. Starknet accounts must be deployed
//! before use, so the contract call wallet is only ready when both its key and
//! account address are configured. Families without a native client stay not
//! ready; their chains report "Wallet not ready" on every balance check.

use derby_adapters::{
	AdapterError, AlloyEvmClient, ContractCallClient, EvmClient, KeypairLedgerClient,
	SolanaRpcClient, StarknetRpcClient, WalletState, WalletStates,
};
use derby_config::WalletsConfig;
use derby_types::{truncate_id, SecretString};
use std::sync::Arc;

fn configured(key: &Option<SecretString>) -> Option<&SecretString> {
	key.as_ref().filter(|key| !key.is_empty())
}

fn provision_evm(config: &WalletsConfig) -> Result<Arc<dyn EvmClient>, AdapterError> {
	let evm = match configured(&config.evm_private_key) {
		Some(key) => AlloyEvmClient::from_private_key(key)?,
		None => {
			let client = AlloyEvmClient::random();
			tracing::warn!(
				address = %client.address(),
				"No EVM private key configured, generated an ephemeral wallet"
			);
			client
		},
	};
	tracing::info!(component = "wallet", family = "evm", address = %truncate_id(&evm.address()), "Loaded");
	Ok(Arc::new(evm) as Arc<dyn EvmClient>)
}

fn provision_keypair_ledger(
	config: &WalletsConfig,
) -> Result<Arc<dyn KeypairLedgerClient>, AdapterError> {
	let ledger = match configured(&config.keypair_ledger_private_key) {
		Some(key) => SolanaRpcClient::from_keypair(key)?,
		None => {
			let client = SolanaRpcClient::random();
			tracing::warn!(
				address = %client.address(),
				"No keypair ledger key configured, generated an ephemeral wallet"
			);
			client
		},
	};
	tracing::info!(component = "wallet", family = "keypair_ledger", address = %truncate_id(&ledger.address()), "Loaded");
	Ok(Arc::new(ledger) as Arc<dyn KeypairLedgerClient>)
}

fn provision_contract_call(
	config: &WalletsConfig,
) -> Result<WalletState<dyn ContractCallClient>, AdapterError> {
	let address = config
		.starknet_account_address
		.as_deref()
		.filter(|address| !address.trim().is_empty());
	match (configured(&config.starknet_private_key), address) {
		(Some(key), Some(address)) => {
			let client = StarknetRpcClient::from_config(key, address)?;
			tracing::info!(component = "wallet", family = "contract_call", address = %truncate_id(&client.address()), "Loaded");
			Ok(WalletState::ready(Arc::new(client) as Arc<dyn ContractCallClient>))
		},
		_ => {
			tracing::warn!(
				component = "wallet",
				family = "contract_call",
				"No deployed Starknet account configured, wallet not ready"
			);
			Ok(WalletState::not_ready())
		},
	}
}

/// Builds the wallet of every family that has a native client.
///
/// Fails only when a configured key cannot be parsed.
pub fn provision_wallets(config: &WalletsConfig) -> Result<WalletStates, AdapterError> {
	Ok(WalletStates {
		evm: WalletState::ready(provision_evm(config)?),
		keypair_ledger: WalletState::ready(provision_keypair_ledger(config)?),
		contract_call: provision_contract_call(config)?,
		..WalletStates::default()
	})
}
