//! Keypair and blockhash ledger adapter.
//!
//! Every transaction of a batch is signed against one recent blockhash. Each
//! index transfers a different amount to self (`index + 1` base units) so no
//! two signatures collide. Submission broadcasts the pre-signed bytes and
//! then confirms; when that fails and the chain allows it, a fresh transfer
//! is built, sent and confirmed in one call instead.

use crate::factory::{ChainAdapterFactory, ChainAdapterRegistry};
use crate::{
	AdapterContext, AdapterError, ChainAdapter, ErrorFormatter, ErrorRule, PreparedTransaction,
	RetryPolicy, TxPayload, WalletState, WalletStates,
};
use async_trait::async_trait;
use derby_types::{
	ChainBalance, ChainDescriptor, ChainFamily, Commitment, ImplementationRegistry,
	KeypairLedgerChain, TransactionResult,
};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

const SOLANA_RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient SOL for transaction fees"),
	ErrorRule::new("blockhash not found", "Transaction expired - please try again"),
	ErrorRule::new("timeout", "Solana network timeout - please try again"),
	ErrorRule::new("timed out", "Solana network timeout - please try again"),
];

const SOON_RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient funds for SOON transaction fees"),
	ErrorRule::new("blockhash not found", "Transaction expired - please try again"),
	ErrorRule::new("timeout", "SOON network timeout - please try again"),
	ErrorRule::new("timed out", "SOON network timeout - please try again"),
];

/// Network and signing operations the keypair ledger adapter relies on.
#[async_trait]
pub trait KeypairLedgerClient: Send + Sync {
	fn address(&self) -> String;

	async fn get_balance(&self, endpoint: &str, commitment: Commitment)
		-> Result<u64, AdapterError>;

	async fn get_latest_blockhash(
		&self,
		endpoint: &str,
		commitment: Commitment,
	) -> Result<String, AdapterError>;

	/// Signs a self-transfer of `lamports` bound to `blockhash`.
	fn sign_transfer(&self, blockhash: &str, lamports: u64) -> Result<Vec<u8>, AdapterError>;

	/// Broadcasts with preflight and returns the signature.
	async fn send_raw_transaction(
		&self,
		endpoint: &str,
		raw: &[u8],
		commitment: Commitment,
	) -> Result<String, AdapterError>;

	async fn confirm_transaction(
		&self,
		endpoint: &str,
		signature: &str,
		commitment: Commitment,
	) -> Result<(), AdapterError>;

	/// Builds, signs, sends and confirms a fresh self-transfer.
	async fn send_and_confirm_transfer(
		&self,
		endpoint: &str,
		lamports: u64,
		commitment: Commitment,
	) -> Result<String, AdapterError>;
}

/// Adapter for Solana clusters and SOON rollups.
pub struct KeypairLedgerAdapter {
	ctx: AdapterContext,
	chain: KeypairLedgerChain,
	wallet: WalletState<dyn KeypairLedgerClient>,
}

impl KeypairLedgerAdapter {
	pub fn new(
		descriptor: ChainDescriptor,
		chain: KeypairLedgerChain,
		wallet: WalletState<dyn KeypairLedgerClient>,
		policy: RetryPolicy,
	) -> Self {
		let rules = if descriptor.id.is_soon() {
			SOON_RULES
		} else {
			SOLANA_RULES
		};
		Self {
			ctx: AdapterContext::new(descriptor, policy, ErrorFormatter::base().with_rules(rules)),
			chain,
			wallet,
		}
	}

	fn client(&self) -> Result<&Arc<dyn KeypairLedgerClient>, AdapterError> {
		self.wallet.client().ok_or(AdapterError::WalletNotReady)
	}

	/// Runs `op` against each endpoint in order and returns the first success
	/// together with the endpoint that produced it.
	async fn first_endpoint<'a, T, F, Fut>(&'a self, op: F) -> Result<(T, &'a str), AdapterError>
	where
		F: Fn(&'a str) -> Fut,
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		for endpoint in &self.chain.endpoints {
			match op(endpoint).await {
				Ok(value) => return Ok((value, endpoint.as_str())),
				Err(e) => warn!(
					chain = %self.ctx.descriptor.name,
					endpoint = %endpoint,
					error = %e,
					"RPC endpoint failed"
				),
			}
		}
		Err(AdapterError::Network(format!(
			"All RPC endpoints failed for {}",
			self.ctx.descriptor.id
		)))
	}

	async fn send_prepared(
		&self,
		client: &Arc<dyn KeypairLedgerClient>,
		endpoint: &str,
		raw: &[u8],
	) -> Result<String, AdapterError> {
		let commitment = self.chain.commitment;
		let signature = self
			.ctx
			.policy
			.with_timeout(client.send_raw_transaction(endpoint, raw, commitment))
			.await?;
		self.ctx
			.policy
			.with_timeout(client.confirm_transaction(endpoint, &signature, commitment))
			.await?;
		Ok(signature)
	}
}

#[async_trait]
impl ChainAdapter for KeypairLedgerAdapter {
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
		let commitment = self.chain.commitment;
		let result = self
			.ctx
			.guarded(|| async {
				self.first_endpoint(|endpoint| client.get_balance(endpoint, commitment))
					.await
			})
			.await;
		match result {
			Ok((lamports, _)) => self.ctx.balance(lamports as u128),
			Err(e) => self.ctx.balance_error(&e),
		}
	}

	async fn prepare_transactions(
		&self,
		count: usize,
	) -> Result<Vec<PreparedTransaction>, AdapterError> {
		let client = self.client()?;
		let commitment = self.chain.commitment;
		let (blockhash, endpoint) = self
			.ctx
			.guarded(|| async {
				self.first_endpoint(|endpoint| client.get_latest_blockhash(endpoint, commitment))
					.await
			})
			.await?;

		let prepared = (0..count)
			.map(|index| {
				let lamports = index as u64 + 1;
				match client.sign_transfer(&blockhash, lamports) {
					Ok(raw) => PreparedTransaction::new(
						index,
						TxPayload::KeypairLedger {
							raw,
							lamports,
							endpoint: endpoint.to_string(),
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
				}
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

		let (endpoint, lamports, outcome) = match prepared.payload {
			Some(TxPayload::KeypairLedger {
				raw,
				lamports,
				endpoint,
			}) => {
				let outcome = self.send_prepared(client, &endpoint, &raw).await;
				(endpoint, lamports, outcome)
			},
			_ => (
				self.chain.endpoints.first().cloned().unwrap_or_default(),
				prepared.index as u64 + 1,
				Err(AdapterError::TransactionFailed(format!(
					"No prepared transaction data for tx #{}",
					prepared.index
				))),
			),
		};

		let error = match outcome {
			Ok(signature) => return self.ctx.success(started, signature),
			Err(e) => e,
		};
		if !self.chain.fallback_send {
			return self.ctx.failure(started, &error);
		}

		warn!(
			chain = %self.ctx.descriptor.name,
			index = prepared.index,
			error = %error,
			"Pre-signed transaction failed, sending a fresh one"
		);
		match self
			.ctx
			.policy
			.with_timeout(client.send_and_confirm_transfer(
				&endpoint,
				lamports,
				self.chain.commitment,
			))
			.await
		{
			Ok(signature) => self.ctx.success(started, signature),
			Err(e) => self.ctx.failure(started, &e),
		}
	}

	fn format_error(&self, error: &AdapterError) -> String {
		self.ctx.format_error(error)
	}
}

/// Factory function to create a keypair ledger adapter from a descriptor.
pub fn create_adapter(
	descriptor: ChainDescriptor,
	wallets: &WalletStates,
	policy: RetryPolicy,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
	let chain = match &descriptor.family {
		ChainFamily::KeypairLedger(chain) => chain.clone(),
		_ => return Err(AdapterError::UnsupportedChain(descriptor.id.to_string())),
	};
	if chain.endpoints.is_empty() {
		return Err(AdapterError::UnsupportedChain(format!(
			"{} has no RPC endpoints",
			descriptor.id
		)));
	}
	Ok(Arc::new(KeypairLedgerAdapter::new(
		descriptor,
		chain,
		wallets.keypair_ledger.clone(),
		policy,
	)))
}

/// Registry for the keypair ledger adapter implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "keypair_ledger";
	type Factory = ChainAdapterFactory;

	fn factory() -> Self::Factory {
		create_adapter
	}
}

impl ChainAdapterRegistry for Registry {}
