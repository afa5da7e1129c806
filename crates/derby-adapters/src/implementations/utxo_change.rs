//! UTXO change chaining adapter.
//!
//! Only the first transaction of a batch can be signed ahead of time: it
//! spends the largest coin above the dust floor. Every later transaction
//! spends the base-asset change output of its predecessor, which is only
//! known once that predecessor is pre-confirmed. Executions of one chain are
//! therefore strictly sequential.

use crate::factory::{ChainAdapterFactory, ChainAdapterRegistry};
use crate::{
	AdapterContext, AdapterError, ChainAdapter, ErrorFormatter, ErrorRule, PreparedTransaction,
	RetryPolicy, TxPayload, WalletState, WalletStates,
};
use async_trait::async_trait;
use derby_types::{
	with_0x_prefix, ChainBalance, ChainDescriptor, ChainFamily, ImplementationRegistry,
	TransactionResult, UtxoChangeChain,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Coins at or below this amount are never selected as the first input.
pub const MIN_COIN_AMOUNT: u64 = 10_000;

pub const MAX_FEE: u64 = 100;

const RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient ETH for transaction fees"),
	ErrorRule::new("timeout", "Fuel network timeout - please try again"),
	ErrorRule::new("timed out", "Fuel network timeout - please try again"),
];

/// A coin or change output that can fund a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableInput {
	pub utxo_id: String,
	pub asset_id: String,
	pub amount: u64,
}

/// Outputs resolved when a submitted transaction is pre-confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreConfirmation {
	pub tx_id: String,
	pub resolved_outputs: Vec<SpendableInput>,
}

/// Network and signing operations the UTXO change adapter relies on.
#[async_trait]
pub trait UtxoChangeClient: Send + Sync {
	fn address(&self) -> String;

	async fn get_balance(&self, chain: &UtxoChangeChain) -> Result<u128, AdapterError>;

	async fn base_asset_id(&self, chain: &UtxoChangeChain) -> Result<String, AdapterError>;

	async fn get_coins(
		&self,
		chain: &UtxoChangeChain,
		asset_id: &str,
	) -> Result<Vec<SpendableInput>, AdapterError>;

	/// Signs an empty script transaction funded by `input`.
	async fn sign_script(
		&self,
		chain: &UtxoChangeChain,
		input: &SpendableInput,
		max_fee: u64,
	) -> Result<Vec<u8>, AdapterError>;

	/// Submits and waits for the pre-confirmation signal.
	async fn submit_and_preconfirm(
		&self,
		chain: &UtxoChangeChain,
		raw: &[u8],
	) -> Result<PreConfirmation, AdapterError>;
}

#[derive(Debug, Default)]
struct ChainCursor {
	base_asset_id: String,
	last_change: Option<SpendableInput>,
}

/// Adapter for Fuel style UTXO chains.
pub struct UtxoChangeAdapter {
	ctx: AdapterContext,
	chain: UtxoChangeChain,
	wallet: WalletState<dyn UtxoChangeClient>,
	cursor: Mutex<ChainCursor>,
}

impl UtxoChangeAdapter {
	pub fn new(
		descriptor: ChainDescriptor,
		chain: UtxoChangeChain,
		wallet: WalletState<dyn UtxoChangeClient>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			ctx: AdapterContext::new(descriptor, policy, ErrorFormatter::base().with_rules(RULES)),
			chain,
			wallet,
			cursor: Mutex::new(ChainCursor::default()),
		}
	}

	fn client(&self) -> Result<&Arc<dyn UtxoChangeClient>, AdapterError> {
		self.wallet.client().ok_or(AdapterError::WalletNotReady)
	}

	async fn submit(
		&self,
		client: &Arc<dyn UtxoChangeClient>,
		payload: Option<TxPayload>,
		index: usize,
	) -> Result<String, AdapterError> {
		let mut cursor = self.cursor.lock().await;
		let raw = match payload {
			Some(TxPayload::UtxoSigned { raw, .. }) => raw,
			Some(TxPayload::UtxoChained) => {
				let change = cursor.last_change.take().ok_or_else(|| {
					AdapterError::TransactionFailed(
						"No resolved output available for subsequent transaction".to_string(),
					)
				})?;
				client.sign_script(&self.chain, &change, MAX_FEE).await?
			},
			_ => {
				return Err(AdapterError::TransactionFailed(format!(
					"No pre-signed transaction available for tx #{}",
					index
				)))
			},
		};

		let confirmation = self
			.ctx
			.policy
			.with_timeout(client.submit_and_preconfirm(&self.chain, &raw))
			.await?;
		cursor.last_change = confirmation
			.resolved_outputs
			.into_iter()
			.find(|output| output.asset_id == cursor.base_asset_id);
		debug!(
			chain = %self.ctx.descriptor.name,
			index,
			has_change = cursor.last_change.is_some(),
			"Transaction pre-confirmed"
		);
		Ok(with_0x_prefix(&confirmation.tx_id))
	}
}

#[async_trait]
impl ChainAdapter for UtxoChangeAdapter {
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
		let base_asset_id = self
			.ctx
			.guarded(|| client.base_asset_id(&self.chain))
			.await?;
		let coins = self
			.ctx
			.guarded(|| client.get_coins(&self.chain, &base_asset_id))
			.await?;

		let input = coins
			.into_iter()
			.filter(|coin| coin.amount > MIN_COIN_AMOUNT)
			.max_by_key(|coin| coin.amount)
			.ok_or_else(|| {
				AdapterError::Preparation("No UTXOs with sufficient balance found".to_string())
			})?;
		let raw = client.sign_script(&self.chain, &input, MAX_FEE).await?;

		*self.cursor.lock().await = ChainCursor {
			base_asset_id,
			last_change: None,
		};

		let mut prepared = Vec::with_capacity(count);
		if count > 0 {
			prepared.push(PreparedTransaction::new(
				0,
				TxPayload::UtxoSigned { raw, input },
			));
		}
		prepared.extend((1..count).map(|index| PreparedTransaction::new(index, TxPayload::UtxoChained)));
		Ok(prepared)
	}

	async fn execute_transaction(&self, prepared: PreparedTransaction) -> TransactionResult {
		let started = Instant::now();
		let client = match self.client() {
			Ok(client) => client,
			Err(e) => return self.ctx.failure(started, &e),
		};

		match self.submit(client, prepared.payload, prepared.index).await {
			Ok(hash) => self.ctx.success(started, hash),
			Err(e) => self.ctx.failure(started, &e),
		}
	}

	fn format_error(&self, error: &AdapterError) -> String {
		self.ctx.format_error(error)
	}
}

/// Factory function to create a UTXO change adapter from a descriptor.
pub fn create_adapter(
	descriptor: ChainDescriptor,
	wallets: &WalletStates,
	policy: RetryPolicy,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
	let chain = match &descriptor.family {
		ChainFamily::UtxoChange(chain) => chain.clone(),
		_ => return Err(AdapterError::UnsupportedChain(descriptor.id.to_string())),
	};
	Ok(Arc::new(UtxoChangeAdapter::new(
		descriptor,
		chain,
		wallets.utxo_change.clone(),
		policy,
	)))
}

/// Registry for the UTXO change adapter implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "utxo_change";
	type Factory = ChainAdapterFactory;

	fn factory() -> Self::Factory {
		create_adapter
	}
}

impl ChainAdapterRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex as StdMutex;

	const BASE: &str = "0xbase";

	#[derive(Default)]
	struct ScriptedUtxo {
		coins: Vec<SpendableInput>,
		/// Submissions after which no base-asset change is resolved.
		drop_change_at: Option<usize>,
		spent: StdMutex<Vec<SpendableInput>>,
	}

	fn coin(id: &str, amount: u64) -> SpendableInput {
		SpendableInput {
			utxo_id: id.to_string(),
			asset_id: BASE.to_string(),
			amount,
		}
	}

	#[async_trait]
	impl UtxoChangeClient for ScriptedUtxo {
		fn address(&self) -> String {
			"fuel1qqqq".to_string()
		}

		async fn get_balance(&self, _chain: &UtxoChangeChain) -> Result<u128, AdapterError> {
			Ok(self.coins.iter().map(|c| c.amount as u128).sum())
		}

		async fn base_asset_id(&self, _chain: &UtxoChangeChain) -> Result<String, AdapterError> {
			Ok(BASE.to_string())
		}

		async fn get_coins(
			&self,
			_chain: &UtxoChangeChain,
			_asset_id: &str,
		) -> Result<Vec<SpendableInput>, AdapterError> {
			Ok(self.coins.clone())
		}

		async fn sign_script(
			&self,
			_chain: &UtxoChangeChain,
			input: &SpendableInput,
			max_fee: u64,
		) -> Result<Vec<u8>, AdapterError> {
			assert_eq!(max_fee, MAX_FEE);
			self.spent.lock().unwrap().push(input.clone());
			Ok(input.utxo_id.as_bytes().to_vec())
		}

		async fn submit_and_preconfirm(
			&self,
			_chain: &UtxoChangeChain,
			raw: &[u8],
		) -> Result<PreConfirmation, AdapterError> {
			let spent_id = String::from_utf8(raw.to_vec()).unwrap();
			let submitted = self.spent.lock().unwrap().len();
			let tx_id = format!("tx{}", submitted);
			let mut resolved_outputs = vec![SpendableInput {
				utxo_id: format!("{}-token", tx_id),
				asset_id: "0xother".to_string(),
				amount: 1,
			}];
			if self.drop_change_at != Some(submitted) {
				resolved_outputs.push(coin(&format!("{}-change-of-{}", tx_id, spent_id), 50_000));
			}
			Ok(PreConfirmation {
				tx_id,
				resolved_outputs,
			})
		}
	}

	fn adapter(client: Arc<ScriptedUtxo>) -> Arc<dyn ChainAdapter> {
		let raw: toml::Value = toml::from_str(
			"id = \"fuel-testnet\"\nname = \"Fuel Testnet\"\nrpc_url = \"http://fuel\"",
		)
		.unwrap();
		let descriptor = ChainDescriptor::from_raw(&raw).unwrap();
		let wallets = WalletStates {
			utxo_change: WalletState::ready(client as Arc<dyn UtxoChangeClient>),
			..Default::default()
		};
		create_adapter(descriptor, &wallets, RetryPolicy::default()).unwrap()
	}

	#[tokio::test]
	async fn test_chains_change_outputs() {
		let client = Arc::new(ScriptedUtxo {
			coins: vec![coin("dust", 9_000), coin("small", 20_000), coin("big", 90_000)],
			..Default::default()
		});
		let adapter = adapter(client.clone());

		let prepared = adapter.prepare_transactions(3).await.unwrap();
		assert_eq!(prepared.len(), 3);
		assert!(matches!(prepared[0].payload, Some(TxPayload::UtxoSigned { .. })));
		assert_eq!(prepared[2].payload, Some(TxPayload::UtxoChained));

		for tx in prepared {
			let result = adapter.execute_transaction(tx).await;
			assert!(result.success, "{:?}", result.error);
		}

		let spent: Vec<String> = client
			.spent
			.lock()
			.unwrap()
			.iter()
			.map(|input| input.utxo_id.clone())
			.collect();
		assert_eq!(
			spent,
			vec!["big", "tx1-change-of-big", "tx2-change-of-tx1-change-of-big"]
		);
	}

	#[tokio::test]
	async fn test_missing_change_fails_next_transaction() {
		let client = Arc::new(ScriptedUtxo {
			coins: vec![coin("big", 90_000)],
			drop_change_at: Some(1),
			..Default::default()
		});
		let adapter = adapter(client);
		let prepared = adapter.prepare_transactions(2).await.unwrap();

		let first = adapter.execute_transaction(prepared[0].clone()).await;
		assert!(first.success);
		assert_eq!(first.tx_hash.as_deref(), Some("0xtx1"));

		let second = adapter.execute_transaction(prepared[1].clone()).await;
		assert!(!second.success);
		assert_eq!(
			second.error.as_deref(),
			Some("Transaction failed: No resolved output available for subsequent transaction")
		);
	}

	#[tokio::test]
	async fn test_no_spendable_coin() {
		let client = Arc::new(ScriptedUtxo {
			coins: vec![coin("dust", MIN_COIN_AMOUNT)],
			..Default::default()
		});
		let adapter = adapter(client);

		let err = adapter.prepare_transactions(5).await.unwrap_err();
		assert_eq!(
			err,
			AdapterError::Preparation("No UTXOs with sufficient balance found".to_string())
		);
	}

	#[test]
	fn test_errors_name_the_base_asset() {
		let adapter = adapter(Arc::new(ScriptedUtxo::default()));

		assert_eq!(
			adapter.format_error(&AdapterError::Network("InsufficientFunds: insufficient funds".to_string())),
			"Insufficient ETH for transaction fees"
		);
		assert_eq!(
			adapter.format_error(&AdapterError::Timeout(30_000)),
			"Fuel network timeout - please try again"
		);
		assert_eq!(
			adapter.format_error(&AdapterError::TransactionFailed("nonce too low".to_string())),
			"Transaction nonce issue - try again"
		);
	}
}
