//! Alloy-backed EVM client.
//!
//! Holds the local signer and one HTTP provider per RPC endpoint. Providers
//! are created lazily on first use and reused for every later call.

use super::adapter::{EvmClient, EvmTransfer};
use crate::AdapterError;
use alloy_eips::eip2718::Encodable2718;
use alloy_network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{TransactionReceipt as RpcReceipt, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::Http;
use async_trait::async_trait;
use dashmap::DashMap;
use derby_types::{EvmChain, SecretString, TransactionReceipt};
use std::sync::Arc;

type HttpProvider = Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>;

/// EVM client signing locally with one private key.
pub struct AlloyEvmClient {
	signer: PrivateKeySigner,
	wallet: EthereumWallet,
	providers: DashMap<String, HttpProvider>,
}

impl AlloyEvmClient {
	pub fn new(signer: PrivateKeySigner) -> Self {
		Self {
			wallet: EthereumWallet::from(signer.clone()),
			signer,
			providers: DashMap::new(),
		}
	}

	/// Loads the signer from a hex private key, with or without `0x`.
	pub fn from_private_key(key: &SecretString) -> Result<Self, AdapterError> {
		let signer = key
			.with_exposed(|k| k.trim().parse::<PrivateKeySigner>())
			.map_err(|e| AdapterError::Signing(format!("Invalid private key: {}", e)))?;
		Ok(Self::new(signer))
	}

	/// Client over a freshly generated key.
	pub fn random() -> Self {
		Self::new(PrivateKeySigner::random())
	}

	fn address_raw(&self) -> Address {
		self.signer.address()
	}

	fn provider(&self, chain: &EvmChain) -> Result<HttpProvider, AdapterError> {
		if let Some(provider) = self.providers.get(&chain.rpc_url) {
			return Ok(provider.clone());
		}

		let url = chain.rpc_url.parse().map_err(|e| {
			AdapterError::Network(format!("Invalid RPC URL {}: {}", chain.rpc_url, e))
		})?;
		let provider: HttpProvider = Arc::new(ProviderBuilder::new().on_http(url));
		self.providers
			.insert(chain.rpc_url.clone(), provider.clone());
		Ok(provider)
	}
}

fn network_error(context: &str, e: impl std::fmt::Display) -> AdapterError {
	AdapterError::Network(format!("{}: {}", context, e))
}

fn convert_receipt(receipt: RpcReceipt) -> TransactionReceipt {
	TransactionReceipt {
		hash: receipt.transaction_hash.to_string(),
		block_number: receipt.block_number,
		success: receipt.status(),
	}
}

#[async_trait]
impl EvmClient for AlloyEvmClient {
	fn address(&self) -> String {
		self.address_raw().to_string()
	}

	async fn get_balance(&self, chain: &EvmChain) -> Result<u128, AdapterError> {
		let balance: U256 = self
			.provider(chain)?
			.get_balance(self.address_raw())
			.await
			.map_err(|e| network_error("Failed to get balance", e))?;
		Ok(balance.saturating_to::<u128>())
	}

	async fn get_nonce(&self, chain: &EvmChain) -> Result<u64, AdapterError> {
		self.provider(chain)?
			.get_transaction_count(self.address_raw())
			.pending()
			.await
			.map_err(|e| network_error("Failed to get nonce", e))
	}

	async fn get_gas_price(&self, chain: &EvmChain) -> Result<u128, AdapterError> {
		self.provider(chain)?
			.get_gas_price()
			.await
			.map_err(|e| network_error("Failed to get gas price", e))
	}

	async fn sign_transfer(
		&self,
		chain: &EvmChain,
		transfer: &EvmTransfer,
	) -> Result<Vec<u8>, AdapterError> {
		let address = self.address_raw();
		let request = TransactionRequest::default()
			.with_from(address)
			.with_to(address)
			.with_value(U256::from(transfer.value))
			.with_nonce(transfer.nonce)
			.with_gas_price(transfer.gas_price)
			.with_gas_limit(transfer.gas_limit)
			.with_chain_id(chain.chain_id)
			.with_input(Bytes::new());

		let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(
			request,
			&self.wallet,
		)
		.await
		.map_err(|e| AdapterError::Signing(e.to_string()))?;

		Ok(envelope.encoded_2718())
	}

	async fn send_raw_transaction(
		&self,
		chain: &EvmChain,
		raw: &[u8],
	) -> Result<String, AdapterError> {
		let pending = self
			.provider(chain)?
			.send_raw_transaction(raw)
			.await
			.map_err(|e| network_error("Failed to send transaction", e))?;
		Ok(pending.tx_hash().to_string())
	}

	async fn send_raw_transaction_sync(
		&self,
		chain: &EvmChain,
		raw: &[u8],
	) -> Result<TransactionReceipt, AdapterError> {
		let receipt: RpcReceipt = self
			.provider(chain)?
			.client()
			.request("eth_sendRawTransactionSync", (Bytes::copy_from_slice(raw),))
			.await
			.map_err(|e| network_error("Sync transaction failed", e))?;
		Ok(convert_receipt(receipt))
	}

	async fn send_raw_transaction_realtime(
		&self,
		chain: &EvmChain,
		raw: &[u8],
	) -> Result<TransactionReceipt, AdapterError> {
		let receipt: RpcReceipt = self
			.provider(chain)?
			.client()
			.request("realtime_sendRawTransaction", (Bytes::copy_from_slice(raw),))
			.await
			.map_err(|e| network_error("Realtime transaction failed", e))?;
		Ok(convert_receipt(receipt))
	}

	async fn get_receipt(
		&self,
		chain: &EvmChain,
		hash: &str,
	) -> Result<Option<TransactionReceipt>, AdapterError> {
		let tx_hash: TxHash = hash
			.parse()
			.map_err(|e| AdapterError::TransactionFailed(format!("Invalid hash {}: {}", hash, e)))?;
		let receipt = self
			.provider(chain)?
			.get_transaction_receipt(tx_hash)
			.await
			.map_err(|e| network_error("Failed to get receipt", e))?;
		Ok(receipt.map(convert_receipt))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::EvmSubmission;

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn chain() -> EvmChain {
		EvmChain {
			chain_id: 31337,
			rpc_url: "http://localhost:8545".to_string(),
			submission: EvmSubmission::Standard,
			fallback_gas_price_wei: None,
		}
	}

	#[test]
	fn test_loads_private_key() {
		let client = AlloyEvmClient::from_private_key(&SecretString::from(KEY)).unwrap();
		assert_eq!(
			client.address().to_lowercase(),
			"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);
	}

	#[test]
	fn test_rejects_invalid_key() {
		let result = AlloyEvmClient::from_private_key(&SecretString::from("not-a-key"));
		assert!(matches!(result, Err(AdapterError::Signing(_))));
	}

	#[tokio::test]
	async fn test_signs_legacy_transfer() {
		let client = AlloyEvmClient::from_private_key(&SecretString::from(KEY)).unwrap();
		let transfer = EvmTransfer {
			nonce: 3,
			gas_price: 1_000_000_000,
			gas_limit: 21_000,
			value: 0,
		};

		let first = client.sign_transfer(&chain(), &transfer).await.unwrap();
		let second = client
			.sign_transfer(&chain(), &EvmTransfer { nonce: 4, ..transfer })
			.await
			.unwrap();

		assert!(!first.is_empty());
		assert_ne!(first, second);
	}

	#[tokio::test]
	async fn test_provider_is_cached_per_url() {
		let client = AlloyEvmClient::random();
		client.provider(&chain()).unwrap();
		client.provider(&chain()).unwrap();
		assert_eq!(client.providers.len(), 1);
	}
}
