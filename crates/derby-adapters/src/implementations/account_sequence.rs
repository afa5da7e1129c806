//! Account sequence ledger adapter.
//!
//! One sequence number is read per batch. Transactions are built and signed
//! concurrently, each at `baseline + index`, and every submission is
//! followed by an explicit wait for the ledger to commit it.

use crate::factory::{ChainAdapterFactory, ChainAdapterRegistry};
use crate::{
	AdapterContext, AdapterError, ChainAdapter, ErrorFormatter, ErrorRule, PreparedTransaction,
	RetryPolicy, TxPayload, WalletState, WalletStates,
};
use async_trait::async_trait;
use derby_types::{
	with_0x_prefix, AccountSequenceChain, ChainBalance, ChainDescriptor, ChainFamily,
	ImplementationRegistry, TransactionResult,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

pub const TRANSFER_FUNCTION: &str = "0x1::aptos_account::transfer";
pub const GAS_UNIT_PRICE: u64 = 100;
pub const MAX_GAS_AMOUNT: u64 = 1_000;

const RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient APT for transaction fees"),
	ErrorRule::new("timeout", "Aptos network timeout - please try again"),
	ErrorRule::new("timed out", "Aptos network timeout - please try again"),
	ErrorRule::new("SEQUENCE_NUMBER_TOO_OLD", "Transaction sequence error - please try again"),
];

/// Entry function call moving `amount` to `recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceTransfer {
	pub function: &'static str,
	pub recipient: String,
	pub amount: u64,
	pub sequence_number: u64,
	pub gas_unit_price: u64,
	pub max_gas_amount: u64,
}

/// Network and signing operations the account sequence adapter relies on.
#[async_trait]
pub trait AccountSequenceClient: Send + Sync {
	fn address(&self) -> String;

	async fn get_balance(&self, chain: &AccountSequenceChain) -> Result<u128, AdapterError>;

	async fn get_sequence_number(&self, chain: &AccountSequenceChain) -> Result<u64, AdapterError>;

	/// Builds the transaction and returns its signed BCS bytes.
	async fn sign_transfer(
		&self,
		chain: &AccountSequenceChain,
		transfer: &SequenceTransfer,
	) -> Result<Vec<u8>, AdapterError>;

	/// Submits and returns the transaction hash.
	async fn submit(&self, chain: &AccountSequenceChain, raw: &[u8]) -> Result<String, AdapterError>;

	async fn wait_for_transaction(
		&self,
		chain: &AccountSequenceChain,
		hash: &str,
	) -> Result<(), AdapterError>;
}

/// Adapter for Aptos style account sequence chains.
pub struct AccountSequenceAdapter {
	ctx: AdapterContext,
	chain: AccountSequenceChain,
	wallet: WalletState<dyn AccountSequenceClient>,
}

impl AccountSequenceAdapter {
	pub fn new(
		descriptor: ChainDescriptor,
		chain: AccountSequenceChain,
		wallet: WalletState<dyn AccountSequenceClient>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			ctx: AdapterContext::new(descriptor, policy, ErrorFormatter::base().with_rules(RULES)),
			chain,
			wallet,
		}
	}

	fn client(&self) -> Result<&Arc<dyn AccountSequenceClient>, AdapterError> {
		self.wallet.client().ok_or(AdapterError::WalletNotReady)
	}

	async fn submit_and_wait(
		&self,
		client: &Arc<dyn AccountSequenceClient>,
		raw: &[u8],
	) -> Result<String, AdapterError> {
		let hash = self
			.ctx
			.policy
			.with_timeout(client.submit(&self.chain, raw))
			.await?;
		self.ctx
			.policy
			.with_timeout(client.wait_for_transaction(&self.chain, &hash))
			.await?;
		Ok(with_0x_prefix(&hash))
	}
}

#[async_trait]
impl ChainAdapter for AccountSequenceAdapter {
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
		let baseline = self
			.ctx
			.guarded(|| client.get_sequence_number(&self.chain))
			.await?;
		let recipient = client.address();

		let signing = (0..count).map(|index| {
			let transfer = SequenceTransfer {
				function: TRANSFER_FUNCTION,
				recipient: recipient.clone(),
				amount: 0,
				sequence_number: baseline + index as u64,
				gas_unit_price: GAS_UNIT_PRICE,
				max_gas_amount: MAX_GAS_AMOUNT,
			};
			async move {
				let signed = client.sign_transfer(&self.chain, &transfer).await;
				(index, transfer.sequence_number, signed)
			}
		});

		let prepared = join_all(signing)
			.await
			.into_iter()
			.map(|(index, sequence_number, signed)| match signed {
				Ok(raw) => PreparedTransaction::new(
					index,
					TxPayload::AccountSequence {
						raw,
						sequence_number,
					},
				),
				Err(e) => {
					warn!(
						chain = %self.ctx.descriptor.name,
						index,
						error = %e,
						"Failed to sign transaction"
					);
					PreparedTransaction::placeholder(index)
				},
			})
			.collect();
		Ok(prepared)
	}

	async fn execute_transaction(&self, prepared: PreparedTransaction) -> TransactionResult {
		let started = Instant::now();
		let client = match self.client() {
			Ok(client) => client,
			Err(e) => return self.ctx.failure(started, &e),
		};
		let raw = match prepared.payload {
			Some(TxPayload::AccountSequence { raw, .. }) => raw,
			_ => {
				let e = AdapterError::TransactionFailed(format!(
					"No pre-signed transaction available for tx #{}",
					prepared.index
				));
				return self.ctx.failure(started, &e);
			},
		};

		match self.submit_and_wait(client, &raw).await {
			Ok(hash) => self.ctx.success(started, hash),
			Err(e) => self.ctx.failure(started, &e),
		}
	}

	fn format_error(&self, error: &AdapterError) -> String {
		self.ctx.format_error(error)
	}
}

/// Factory function to create an account sequence adapter from a descriptor.
pub fn create_adapter(
	descriptor: ChainDescriptor,
	wallets: &WalletStates,
	policy: RetryPolicy,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
	let chain = match &descriptor.family {
		ChainFamily::AccountSequence(chain) => chain.clone(),
		_ => return Err(AdapterError::UnsupportedChain(descriptor.id.to_string())),
	};
	Ok(Arc::new(AccountSequenceAdapter::new(
		descriptor,
		chain,
		wallets.account_sequence.clone(),
		policy,
	)))
}

/// Registry for the account sequence adapter implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "account_sequence";
	type Factory = ChainAdapterFactory;

	fn factory() -> Self::Factory {
		create_adapter
	}
}

impl ChainAdapterRegistry for Registry {}
