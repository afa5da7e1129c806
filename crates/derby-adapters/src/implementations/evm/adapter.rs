//! EVM family adapter.
//!
//! Fetches the nonce and gas price once, pre-signs the whole batch with
//! consecutive nonces and submits each transaction through the chain's
//! configured submission path.

use crate::factory::{ChainAdapterFactory, ChainAdapterRegistry};
use crate::{
	AdapterContext, AdapterError, ChainAdapter, ErrorFormatter, PreparedTransaction, RetryPolicy,
	TxPayload, WalletState, WalletStates,
};
use async_trait::async_trait;
use derby_types::{
	ChainBalance, ChainDescriptor, ChainFamily, EvmChain, EvmSubmission, ImplementationRegistry,
	TransactionReceipt, TransactionResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Multiplier applied to the node's gas price quote.
const GAS_PRICE_MULTIPLIER: u128 = 3;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Parameters of one zero-value self-transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmTransfer {
	pub nonce: u64,
	pub gas_price: u128,
	pub gas_limit: u64,
	pub value: u128,
}

/// Network and signing operations the EVM adapter relies on.
#[async_trait]
pub trait EvmClient: Send + Sync {
	fn address(&self) -> String;

	async fn get_balance(&self, chain: &EvmChain) -> Result<u128, AdapterError>;

	/// Pending transaction count of the wallet address.
	async fn get_nonce(&self, chain: &EvmChain) -> Result<u64, AdapterError>;

	async fn get_gas_price(&self, chain: &EvmChain) -> Result<u128, AdapterError>;

	/// Signs a self-transfer and returns the EIP-2718 encoded bytes.
	async fn sign_transfer(
		&self,
		chain: &EvmChain,
		transfer: &EvmTransfer,
	) -> Result<Vec<u8>, AdapterError>;

	/// Broadcasts and returns the transaction hash.
	async fn send_raw_transaction(&self, chain: &EvmChain, raw: &[u8])
		-> Result<String, AdapterError>;

	/// `eth_sendRawTransactionSync`, which returns the receipt.
	async fn send_raw_transaction_sync(
		&self,
		chain: &EvmChain,
		raw: &[u8],
	) -> Result<TransactionReceipt, AdapterError>;

	/// `realtime_sendRawTransaction`, which returns the receipt.
	async fn send_raw_transaction_realtime(
		&self,
		chain: &EvmChain,
		raw: &[u8],
	) -> Result<TransactionReceipt, AdapterError>;

	/// Receipt of a mined transaction, `None` while still pending.
	async fn get_receipt(
		&self,
		chain: &EvmChain,
		hash: &str,
	) -> Result<Option<TransactionReceipt>, AdapterError>;
}

/// Adapter for EVM chains, keyed by numeric chain id.
pub struct EvmAdapter {
	ctx: AdapterContext,
	chain: EvmChain,
	wallet: WalletState<dyn EvmClient>,
}

impl EvmAdapter {
	pub fn new(
		descriptor: ChainDescriptor,
		chain: EvmChain,
		wallet: WalletState<dyn EvmClient>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			ctx: AdapterContext::new(descriptor, policy, ErrorFormatter::base()),
			chain,
			wallet,
		}
	}

	fn client(&self) -> Result<&Arc<dyn EvmClient>, AdapterError> {
		self.wallet.client().ok_or(AdapterError::WalletNotReady)
	}

	async fn gas_price(&self, client: &Arc<dyn EvmClient>) -> u128 {
		match client.get_gas_price(&self.chain).await {
			Ok(price) => price.saturating_mul(GAS_PRICE_MULTIPLIER),
			Err(e) => {
				let fallback = self.chain.fallback_gas_price();
				warn!(
					chain = %self.ctx.descriptor.name,
					error = %e,
					fallback_wei = fallback,
					"Gas price unavailable, using fallback"
				);
				fallback
			},
		}
	}

	async fn submit(
		&self,
		client: &Arc<dyn EvmClient>,
		raw: &[u8],
	) -> Result<TransactionReceipt, AdapterError> {
		let policy = &self.ctx.policy;
		match self.chain.submission {
			EvmSubmission::Sync => {
				policy
					.with_timeout(client.send_raw_transaction_sync(&self.chain, raw))
					.await
			},
			EvmSubmission::Realtime => {
				policy
					.with_timeout(client.send_raw_transaction_realtime(&self.chain, raw))
					.await
			},
			EvmSubmission::Standard => {
				let hash = policy
					.with_timeout(client.send_raw_transaction(&self.chain, raw))
					.await?;
				self.wait_for_confirmation(&hash).await
			},
		}
	}
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
	fn descriptor(&self) -> &ChainDescriptor {
		&self.ctx.descriptor
	}

	fn is_wallet_ready(&self) -> bool {
		self.wallet.is_ready()
	}

	fn wallet_address(&self) -> String {
		self.wallet
			.client()
			.map(|client| client.address())
			.unwrap_or_default()
	}

	async fn check_balance(&self) -> ChainBalance {
		let client = match self.client() {
			Ok(client) => client,
			Err(e) => return self.ctx.balance_error(&e),
		};
		match self
			.ctx
			.guarded(|| client.get_balance(&self.chain))
			.await
		{
			Ok(balance) => self.ctx.balance(balance),
			Err(e) => self.ctx.balance_error(&e),
		}
	}

	async fn prepare_transactions(
		&self,
		count: usize,
	) -> Result<Vec<PreparedTransaction>, AdapterError> {
		let client = self.client()?;
		let (nonce, gas_price) = tokio::join!(
			self.ctx.guarded(|| client.get_nonce(&self.chain)),
			self.gas_price(client)
		);
		let nonce = nonce?;

		let mut prepared = Vec::with_capacity(count);
		for index in 0..count {
			let transfer = EvmTransfer {
				nonce: nonce + index as u64,
				gas_price,
				gas_limit: TRANSFER_GAS_LIMIT,
				value: 0,
			};
			match client.sign_transfer(&self.chain, &transfer).await {
				Ok(raw) => prepared.push(PreparedTransaction::new(
					index,
					TxPayload::Evm {
						raw,
						nonce: transfer.nonce,
					},
				)),
				Err(e) => {
					warn!(
						chain = %self.ctx.descriptor.name,
						index,
						error = %e,
						"Failed to sign transaction"
					);
					prepared.push(PreparedTransaction::placeholder(index));
				},
			}
		}

		debug!(
			chain = %self.ctx.descriptor.name,
			nonce,
			gas_price,
			count,
			"Prepared EVM batch"
		);
		Ok(prepared)
	}

	async fn execute_transaction(&self, prepared: PreparedTransaction) -> TransactionResult {
		let started = Instant::now();
		let client = match self.client() {
			Ok(client) => client,
			Err(e) => return self.ctx.failure(started, &e),
		};
		let raw = match prepared.payload {
			Some(TxPayload::Evm { raw, .. }) => raw,
			_ => {
				let e = AdapterError::TransactionFailed(format!(
					"No signed transaction for tx #{}",
					prepared.index
				));
				return self.ctx.failure(started, &e);
			},
		};

		match self.submit(client, &raw).await {
			Ok(receipt) if receipt.success => self.ctx.success(started, receipt.hash),
			Ok(receipt) => self.ctx.failure(
				started,
				&AdapterError::TransactionFailed(format!("Transaction {} reverted", receipt.hash)),
			),
			Err(e) => self.ctx.failure(started, &e),
		}
	}

	async fn wait_for_confirmation(&self, hash: &str) -> Result<TransactionReceipt, AdapterError> {
		if self.chain.submission != EvmSubmission::Standard {
			return Ok(TransactionReceipt::confirmed(hash));
		}
		let client = self.client()?;

		let poll = async {
			loop {
				match client.get_receipt(&self.chain, hash).await {
					Ok(Some(receipt)) => return receipt,
					Ok(None) => {},
					Err(e) => debug!(tx_hash = %hash, error = %e, "Receipt poll failed"),
				}
				tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
			}
		};

		tokio::time::timeout(RECEIPT_TIMEOUT, poll)
			.await
			.map_err(|_| AdapterError::Timeout(RECEIPT_TIMEOUT.as_millis() as u64))
	}

	fn format_error(&self, error: &AdapterError) -> String {
		self.ctx.format_error(error)
	}
}

/// Factory function to create an EVM adapter from a descriptor.
pub fn create_adapter(
	descriptor: ChainDescriptor,
	wallets: &WalletStates,
	policy: RetryPolicy,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
	let chain = match &descriptor.family {
		ChainFamily::Evm(chain) => chain.clone(),
		_ => return Err(AdapterError::UnsupportedChain(descriptor.id.to_string())),
	};
	Ok(Arc::new(EvmAdapter::new(
		descriptor,
		chain,
		wallets.evm.clone(),
		policy,
	)))
}

/// Registry for the EVM adapter implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm";
	type Factory = ChainAdapterFactory;

	fn factory() -> Self::Factory {
		create_adapter
	}
}

impl ChainAdapterRegistry for Registry {}
