//! Chain adapters for the Chain Derby race system.
//!
//! Every chain family is reached through the [`ChainAdapter`] contract, which
//! hides how that family signs, submits and confirms transactions. Family
//! SDK operations are consumed through small capability-client traits (one
//! per family) held in the shared [`WalletStates`] bundle, so adapters can be
//! driven by real network clients or by scripted ones in tests.

use async_trait::async_trait;
use derby_types::{ChainBalance, ChainDescriptor, TransactionReceipt, TransactionResult};
use thiserror::Error;

pub mod context;
pub mod errors;
pub mod factory;
pub mod retry;
pub mod wallet;

/// Re-export implementations
pub mod implementations {
	pub mod account_sequence;
	pub mod contract_call;
	pub mod evm {
		pub mod adapter;
		pub mod alloy;
	}
	pub mod keypair_ledger;
	pub mod solana_rpc;
	pub mod starknet_rpc;
	pub mod utxo_change;
}

pub use context::AdapterContext;
pub use errors::{ErrorFormatter, ErrorRule};
pub use factory::{AdapterFactory, ChainAdapterFactory, ChainAdapterRegistry};
pub use implementations::account_sequence::{AccountSequenceClient, SequenceTransfer};
pub use implementations::contract_call::{ContractCallClient, TransferCall};
pub use implementations::evm::adapter::{EvmClient, EvmTransfer};
pub use implementations::evm::alloy::AlloyEvmClient;
pub use implementations::keypair_ledger::KeypairLedgerClient;
pub use implementations::solana_rpc::SolanaRpcClient;
pub use implementations::starknet_rpc::StarknetRpcClient;
pub use implementations::utxo_change::{PreConfirmation, SpendableInput, UtxoChangeClient};
pub use retry::RetryPolicy;
pub use wallet::{WalletState, WalletStates};

/// Errors that can occur inside an adapter.
///
/// These never cross the adapter boundary as failures of the race itself:
/// balance checks and executions convert them into result values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// The operation, including all retries, exceeded its time budget.
	#[error("Operation timed out after {0}ms")]
	Timeout(u64),
	/// The family wallet has not been provisioned.
	#[error("Wallet not ready")]
	WalletNotReady,
	/// No adapter family matches the chain descriptor.
	#[error("Unsupported chain: {0}")]
	UnsupportedChain(String),
	/// Error that occurs when a transaction execution fails.
	#[error("Transaction failed: {0}")]
	TransactionFailed(String),
	/// Baseline data for a batch could not be obtained.
	#[error("Preparation failed: {0}")]
	Preparation(String),
	/// Error raised while signing a transaction.
	#[error("Signing failed: {0}")]
	Signing(String),
}

/// Family-specific content of a prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
	/// Signed EVM self-transfer.
	Evm { raw: Vec<u8>, nonce: u64 },
	/// Signed transfer tied to a recent blockhash.
	KeypairLedger {
		raw: Vec<u8>,
		lamports: u64,
		endpoint: String,
	},
	/// First transaction of a UTXO chain, signed over a selected coin.
	UtxoSigned { raw: Vec<u8>, input: SpendableInput },
	/// Later UTXO transaction, built from the previous change output.
	UtxoChained,
	/// Signed account transaction at a fixed sequence number.
	AccountSequence { raw: Vec<u8>, sequence_number: u64 },
	/// Unsigned contract call with its assigned nonce.
	ContractCall { call: TransferCall, nonce: u64 },
}

/// One transaction of a chain's batch, built before the race starts.
///
/// `payload` is `None` when signing that index failed; the slot is kept so
/// indices stay aligned with the requested count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
	pub index: usize,
	pub payload: Option<TxPayload>,
}

impl PreparedTransaction {
	pub fn new(index: usize, payload: TxPayload) -> Self {
		Self {
			index,
			payload: Some(payload),
		}
	}

	pub fn placeholder(index: usize) -> Self {
		Self {
			index,
			payload: None,
		}
	}
}

/// Uniform capability surface over one chain.
///
/// Implementations must never let a network failure escape from
/// `check_balance` or `execute_transaction`; both report failure in the
/// returned value.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
	/// Static descriptor of the chain this adapter drives.
	fn descriptor(&self) -> &ChainDescriptor;

	/// True iff the family wallet has been provisioned.
	fn is_wallet_ready(&self) -> bool;

	/// Address of the sending account, empty when the wallet is not ready.
	fn wallet_address(&self) -> String;

	/// Reads the account balance. Failures yield `has_balance = false` with
	/// the formatted error.
	async fn check_balance(&self) -> ChainBalance;

	/// Builds and signs `count` transactions from a single baseline.
	///
	/// Fails only when the baseline (nonce, blockhash, sequence number,
	/// spendable input) cannot be fetched.
	async fn prepare_transactions(
		&self,
		count: usize,
	) -> Result<Vec<PreparedTransaction>, AdapterError>;

	/// Submits one prepared transaction and waits until it is confirmed.
	///
	/// Latency spans call entry to return on both success and failure.
	async fn execute_transaction(&self, prepared: PreparedTransaction) -> TransactionResult;

	/// Waits for a submitted transaction. Families whose submission already
	/// confirms return an already-confirmed receipt.
	async fn wait_for_confirmation(&self, hash: &str) -> Result<TransactionReceipt, AdapterError> {
		Ok(TransactionReceipt::confirmed(hash))
	}

	/// Renders an adapter error as a user-presentable message.
	fn format_error(&self, error: &AdapterError) -> String {
		ErrorFormatter::base().format(&error.to_string())
	}
}
