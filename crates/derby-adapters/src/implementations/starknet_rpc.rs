//! Starknet JSON-RPC client for contract call chains.
//!
//! Drives an already deployed account contract with a single owner key.
//! Accounts are built lazily per RPC URL since each needs the chain id from
//! its endpoint.

use super::contract_call::{ContractCallClient, TransferCall};
use crate::AdapterError;
use async_trait::async_trait;
use dashmap::DashMap;
use derby_types::{ContractCallChain, SecretString};
use starknet::accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{
	BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, StarknetError,
};
use starknet::core::utils::get_selector_from_name;
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::{Provider, ProviderError, Url};
use starknet::signers::{LocalWallet, SigningKey};
use std::sync::Arc;
use std::time::Duration;

type StarknetAccount = SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Contract call client for one deployed Starknet account.
pub struct StarknetRpcClient {
	signing_key: SigningKey,
	address: Felt,
	accounts: DashMap<String, Arc<StarknetAccount>>,
}

impl StarknetRpcClient {
	pub fn new(signing_key: SigningKey, address: Felt) -> Self {
		Self {
			signing_key,
			address,
			accounts: DashMap::new(),
		}
	}

	/// Loads the owner key and the deployed account address, both hex.
	pub fn from_config(private_key: &SecretString, address: &str) -> Result<Self, AdapterError> {
		let scalar = private_key
			.with_exposed(|k| Felt::from_hex(k.trim()))
			.map_err(|e| AdapterError::Signing(format!("Invalid private key: {}", e)))?;
		let address = Felt::from_hex(address.trim())
			.map_err(|e| AdapterError::Signing(format!("Invalid account address: {}", e)))?;
		Ok(Self::new(SigningKey::from_secret_scalar(scalar), address))
	}

	fn provider(chain: &ContractCallChain) -> Result<JsonRpcClient<HttpTransport>, AdapterError> {
		let url = Url::parse(&chain.rpc_url).map_err(|e| {
			AdapterError::Network(format!("Invalid RPC URL {}: {}", chain.rpc_url, e))
		})?;
		Ok(JsonRpcClient::new(HttpTransport::new(url)))
	}

	async fn account(&self, chain: &ContractCallChain) -> Result<Arc<StarknetAccount>, AdapterError> {
		if let Some(account) = self.accounts.get(&chain.rpc_url) {
			return Ok(account.clone());
		}

		let provider = Self::provider(chain)?;
		let chain_id = provider
			.chain_id()
			.await
			.map_err(|e| network_error("Failed to get chain id", e))?;
		let mut account = SingleOwnerAccount::new(
			provider,
			LocalWallet::from(self.signing_key.clone()),
			self.address,
			chain_id,
			ExecutionEncoding::New,
		);
		account.set_block_id(BlockId::Tag(BlockTag::Pending));
		let account = Arc::new(account);
		self.accounts
			.insert(chain.rpc_url.clone(), account.clone());
		Ok(account)
	}
}

fn network_error(context: &str, e: impl std::fmt::Display) -> AdapterError {
	AdapterError::Network(format!("{}: {}", context, e))
}

fn parse_felt(label: &str, value: &str) -> Result<Felt, AdapterError> {
	Felt::from_hex(value)
		.map_err(|e| AdapterError::TransactionFailed(format!("Invalid {} {}: {}", label, value, e)))
}

fn selector(name: &str) -> Result<Felt, AdapterError> {
	get_selector_from_name(name).map_err(|e| AdapterError::TransactionFailed(e.to_string()))
}

/// Low 128 bits of a felt; `None` when the value does not fit.
fn felt_to_u128(value: Felt) -> Option<u128> {
	let bytes = value.to_bytes_be();
	let (high, low) = bytes.split_at(16);
	if high.iter().any(|b| *b != 0) {
		return None;
	}
	let mut buf = [0u8; 16];
	buf.copy_from_slice(low);
	Some(u128::from_be_bytes(buf))
}

/// Calldata of `transfer(recipient, amount)` with `amount` as a u256 pair.
fn transfer_calldata(call: &TransferCall) -> Result<Vec<Felt>, AdapterError> {
	Ok(vec![
		parse_felt("recipient", &call.recipient)?,
		Felt::from(call.amount),
		Felt::ZERO,
	])
}

#[async_trait]
impl ContractCallClient for StarknetRpcClient {
	fn address(&self) -> String {
		self.address.to_fixed_hex_string()
	}

	async fn get_balance(&self, chain: &ContractCallChain) -> Result<u128, AdapterError> {
		let provider = Self::provider(chain)?;
		let result = provider
			.call(
				FunctionCall {
					contract_address: parse_felt("fee token", &chain.fee_token)?,
					entry_point_selector: selector("balanceOf")?,
					calldata: vec![self.address],
				},
				BlockId::Tag(BlockTag::Pending),
			)
			.await
			.map_err(|e| network_error("Failed to get balance", e))?;

		// u256 as (low, high)
		let low = result.first().copied().unwrap_or(Felt::ZERO);
		let high = result.get(1).copied().unwrap_or(Felt::ZERO);
		if high != Felt::ZERO {
			return Ok(u128::MAX);
		}
		Ok(felt_to_u128(low).unwrap_or(u128::MAX))
	}

	async fn get_nonce(&self, chain: &ContractCallChain) -> Result<u64, AdapterError> {
		let nonce = Self::provider(chain)?
			.get_nonce(BlockId::Tag(BlockTag::Pending), self.address)
			.await
			.map_err(|e| network_error("Failed to get nonce", e))?;
		felt_to_u128(nonce)
			.and_then(|n| u64::try_from(n).ok())
			.ok_or_else(|| AdapterError::Preparation(format!("Nonce out of range: {}", nonce)))
	}

	async fn execute(
		&self,
		chain: &ContractCallChain,
		call: &TransferCall,
		nonce: u64,
	) -> Result<String, AdapterError> {
		let account = self.account(chain).await?;
		let calls = vec![Call {
			to: parse_felt("contract", &call.contract)?,
			selector: selector(call.entrypoint)?,
			calldata: transfer_calldata(call)?,
		}];
		let result = account
			.execute_v3(calls)
			.nonce(Felt::from(nonce))
			.send()
			.await
			.map_err(|e| AdapterError::TransactionFailed(e.to_string()))?;
		Ok(result.transaction_hash.to_fixed_hex_string())
	}

	async fn wait_for_transaction(
		&self,
		chain: &ContractCallChain,
		hash: &str,
	) -> Result<(), AdapterError> {
		let hash = parse_felt("transaction hash", hash)?;
		let provider = Self::provider(chain)?;
		// Bounded by the caller's operation timeout
		loop {
			match provider.get_transaction_receipt(hash).await {
				Ok(receipt) => {
					return match receipt.receipt.execution_result() {
						ExecutionResult::Succeeded => Ok(()),
						ExecutionResult::Reverted { reason } => {
							Err(AdapterError::TransactionFailed(format!("Reverted: {}", reason)))
						},
					};
				},
				Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {
					tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
				},
				Err(e) => return Err(network_error("Failed to get receipt", e)),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::DEFAULT_FEE_TOKEN;

	const KEY: &str = "0x0139fe4d6f02e666e86a6f58e65060f115cd3c185bd9e98bd829636931458f79";
	const ACCOUNT: &str = "0x04a2b383d808b7285cc98b2309f974f5111633c84fd82c9375c118485d2d57ba";

	fn client() -> StarknetRpcClient {
		StarknetRpcClient::from_config(&SecretString::from(KEY), ACCOUNT).unwrap()
	}

	#[test]
	fn test_loads_configured_account() {
		assert_eq!(client().address(), ACCOUNT);
	}

	#[test]
	fn test_rejects_invalid_account() {
		let bad_key = StarknetRpcClient::from_config(&SecretString::from("not-hex"), ACCOUNT);
		let bad_address = StarknetRpcClient::from_config(&SecretString::from(KEY), "0xzz");
		assert!(matches!(bad_key, Err(AdapterError::Signing(_))));
		assert!(matches!(bad_address, Err(AdapterError::Signing(_))));
	}

	#[test]
	fn test_transfer_calldata_splits_u256() {
		let call = TransferCall {
			contract: DEFAULT_FEE_TOKEN.to_string(),
			entrypoint: "transfer",
			recipient: ACCOUNT.to_string(),
			amount: 3_000_000_000_000_000_000,
		};

		let calldata = transfer_calldata(&call).unwrap();

		assert_eq!(
			calldata,
			vec![
				Felt::from_hex(ACCOUNT).unwrap(),
				Felt::from(3_000_000_000_000_000_000u128),
				Felt::ZERO,
			]
		);
	}

	#[test]
	fn test_felt_to_u128_bounds() {
		assert_eq!(felt_to_u128(Felt::from(42u64)), Some(42));
		assert_eq!(felt_to_u128(Felt::from(u128::MAX)), Some(u128::MAX));
		assert_eq!(felt_to_u128(Felt::from(u128::MAX) + Felt::ONE), None);
	}
}
