//! Contract call ledger adapter.
//!
//! Calls cannot be signed ahead of time because the signature covers the
//! execution context, so preparation only computes call descriptors: a fee
//! token transfer to self at `nonce + index`. Execution signs, sends and
//! then waits for the transaction.

use crate::factory::{ChainAdapterFactory, ChainAdapterRegistry};
use crate::{
	AdapterContext, AdapterError, ChainAdapter, ErrorFormatter, ErrorRule, PreparedTransaction,
	RetryPolicy, TxPayload, WalletState, WalletStates,
};
use async_trait::async_trait;
use derby_types::{
	ChainBalance, ChainDescriptor, ChainFamily, ContractCallChain, ImplementationRegistry,
	TransactionResult,
};
use std::sync::Arc;
use tokio::time::Instant;

/// One whole fee token in base units.
const TOKEN_UNIT: u128 = 1_000_000_000_000_000_000;

const RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient STRK for transaction fees"),
	ErrorRule::new("nonce", "Transaction nonce issue - please try again"),
	ErrorRule::new("timeout", "Starknet network timeout - please try again"),
	ErrorRule::new("timed out", "Starknet network timeout - please try again"),
];

/// ERC-20 style `transfer(recipient, amount)` on the fee token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
	pub contract: String,
	pub entrypoint: &'static str,
	pub recipient: String,
	pub amount: u128,
}

/// Network and signing operations the contract call adapter relies on.
#[async_trait]
pub trait ContractCallClient: Send + Sync {
	fn address(&self) -> String;

	/// Fee token balance of the account.
	async fn get_balance(&self, chain: &ContractCallChain) -> Result<u128, AdapterError>;

	async fn get_nonce(&self, chain: &ContractCallChain) -> Result<u64, AdapterError>;

	/// Signs and sends the call at `nonce`, returning the transaction hash.
	async fn execute(
		&self,
		chain: &ContractCallChain,
		call: &TransferCall,
		nonce: u64,
	) -> Result<String, AdapterError>;

	async fn wait_for_transaction(
		&self,
		chain: &ContractCallChain,
		hash: &str,
	) -> Result<(), AdapterError>;
}

/// Adapter for Starknet style account contract chains.
pub struct ContractCallAdapter {
	ctx: AdapterContext,
	chain: ContractCallChain,
	wallet: WalletState<dyn ContractCallClient>,
}

impl ContractCallAdapter {
	pub fn new(
		descriptor: ChainDescriptor,
		chain: ContractCallChain,
		wallet: WalletState<dyn ContractCallClient>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			ctx: AdapterContext::new(descriptor, policy, ErrorFormatter::base().with_rules(RULES)),
			chain,
			wallet,
		}
	}

	fn client(&self) -> Result<&Arc<dyn ContractCallClient>, AdapterError> {
		self.wallet.client().ok_or(AdapterError::WalletNotReady)
	}

	async fn execute_and_wait(
		&self,
		client: &Arc<dyn ContractCallClient>,
		call: &TransferCall,
		nonce: u64,
	) -> Result<String, AdapterError> {
		let hash = self
			.ctx
			.policy
			.with_timeout(client.execute(&self.chain, call, nonce))
			.await?;
		self.ctx
			.policy
			.with_timeout(client.wait_for_transaction(&self.chain, &hash))
			.await?;
		Ok(hash)
	}
}

#[async_trait]
impl ChainAdapter for ContractCallAdapter {
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
		let nonce = self
			.ctx
			.guarded(|| client.get_nonce(&self.chain))
			.await?;
		let recipient = client.address();

		Ok((0..count)
			.map(|index| {
				let call = TransferCall {
					contract: self.chain.fee_token.clone(),
					entrypoint: "transfer",
					recipient: recipient.clone(),
					amount: (index as u128 + 1) * TOKEN_UNIT,
				};
				PreparedTransaction::new(
					index,
					TxPayload::ContractCall {
						call,
						nonce: nonce + index as u64,
					},
				)
			})
			.collect())
	}

	async fn execute_transaction(&self, prepared: PreparedTransaction) -> TransactionResult {
		let started = Instant::now();
		let client = match self.client() {
			Ok(client) => client,
			Err(e) => return self.ctx.failure(started, &e),
		};
		let (call, nonce) = match prepared.payload {
			Some(TxPayload::ContractCall { call, nonce }) => (call, nonce),
			_ => {
				let e = AdapterError::TransactionFailed(format!(
					"No prepared transaction data for tx #{}",
					prepared.index
				));
				return self.ctx.failure(started, &e);
			},
		};

		match self.execute_and_wait(client, &call, nonce).await {
			Ok(hash) => self.ctx.success(started, hash),
			Err(e) => self.ctx.failure(started, &e),
		}
	}

	fn format_error(&self, error: &AdapterError) -> String {
		self.ctx.format_error(error)
	}
}

/// Factory function to create a contract call adapter from a descriptor.
pub fn create_adapter(
	descriptor: ChainDescriptor,
	wallets: &WalletStates,
	policy: RetryPolicy,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
	let chain = match &descriptor.family {
		ChainFamily::ContractCall(chain) => chain.clone(),
		_ => return Err(AdapterError::UnsupportedChain(descriptor.id.to_string())),
	};
	Ok(Arc::new(ContractCallAdapter::new(
		descriptor,
		chain,
		wallets.contract_call.clone(),
		policy,
	)))
}

/// Registry for the contract call adapter implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "contract_call";
	type Factory = ChainAdapterFactory;

	fn factory() -> Self::Factory {
		create_adapter
	}
}

impl ChainAdapterRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::DEFAULT_FEE_TOKEN;
	use std::sync::Mutex;

	#[derive(Default)]
	struct ScriptedContract {
		nonce: u64,
		balance: u128,
		executed: Mutex<Vec<(TransferCall, u64)>>,
		waited: Mutex<Vec<String>>,
	}

	#[async_trait]
	impl ContractCallClient for ScriptedContract {
		fn address(&self) -> String {
			"0x5eed".to_string()
		}

		async fn get_balance(&self, _chain: &ContractCallChain) -> Result<u128, AdapterError> {
			Ok(self.balance)
		}

		async fn get_nonce(&self, _chain: &ContractCallChain) -> Result<u64, AdapterError> {
			Ok(self.nonce)
		}

		async fn execute(
			&self,
			_chain: &ContractCallChain,
			call: &TransferCall,
			nonce: u64,
		) -> Result<String, AdapterError> {
			self.executed.lock().unwrap().push((call.clone(), nonce));
			Ok(format!("0x{:x}", nonce))
		}

		async fn wait_for_transaction(
			&self,
			_chain: &ContractCallChain,
			hash: &str,
		) -> Result<(), AdapterError> {
			self.waited.lock().unwrap().push(hash.to_string());
			Ok(())
		}
	}

	fn adapter(client: Arc<ScriptedContract>) -> Arc<dyn ChainAdapter> {
		let raw: toml::Value = toml::from_str(
			"id = \"starknet-testnet\"\nname = \"Starknet Sepolia\"\nrpc_url = \"http://starknet\"",
		)
		.unwrap();
		let descriptor = ChainDescriptor::from_raw(&raw).unwrap();
		let wallets = WalletStates {
			contract_call: WalletState::ready(client as Arc<dyn ContractCallClient>),
			..Default::default()
		};
		create_adapter(descriptor, &wallets, RetryPolicy::default()).unwrap()
	}

	#[tokio::test]
	async fn test_calls_use_sequential_nonces_and_amounts() {
		let client = Arc::new(ScriptedContract {
			nonce: 8,
			..Default::default()
		});
		let adapter = adapter(client.clone());

		let prepared = adapter.prepare_transactions(3).await.unwrap();
		for tx in prepared {
			assert!(adapter.execute_transaction(tx).await.success);
		}

		let executed = client.executed.lock().unwrap();
		let nonces: Vec<u64> = executed.iter().map(|(_, nonce)| *nonce).collect();
		assert_eq!(nonces, vec![8, 9, 10]);
		let amounts: Vec<u128> = executed.iter().map(|(call, _)| call.amount).collect();
		assert_eq!(amounts, vec![TOKEN_UNIT, 2 * TOKEN_UNIT, 3 * TOKEN_UNIT]);
		assert!(executed
			.iter()
			.all(|(call, _)| call.contract == DEFAULT_FEE_TOKEN && call.recipient == "0x5eed"));
		assert_eq!(
			client.waited.lock().unwrap().as_slice(),
			&["0x8".to_string(), "0x9".to_string(), "0xa".to_string()]
		);
	}

	#[tokio::test]
	async fn test_fee_token_threshold() {
		let funded = adapter(Arc::new(ScriptedContract {
			balance: 20_000_000_000_000_001,
			..Default::default()
		}));
		let short = adapter(Arc::new(ScriptedContract {
			balance: 20_000_000_000_000_000,
			..Default::default()
		}));

		assert!(funded.check_balance().await.has_balance);
		assert!(!short.check_balance().await.has_balance);
	}

	#[test]
	fn test_errors_name_strk() {
		let adapter = adapter(Arc::new(ScriptedContract::default()));

		assert_eq!(
			adapter.format_error(&AdapterError::TransactionFailed(
				"Insufficient funds to cover the max fee".to_string()
			)),
			"Insufficient STRK for transaction fees"
		);
		assert_eq!(
			adapter.format_error(&AdapterError::TransactionFailed("Invalid transaction nonce".to_string())),
			"Transaction nonce issue - please try again"
		);
		assert_eq!(
			adapter.format_error(&AdapterError::Timeout(30_000)),
			"Starknet network timeout - please try again"
		);
	}
}
