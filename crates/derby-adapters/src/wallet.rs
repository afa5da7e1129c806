//! Per-family wallet state.
//!
//! One [`WalletState`] exists per chain family and is shared by every adapter
//! of that family. The provisioning step outside the core decides whether a
//! family has a usable client; adapters only read it.

use crate::{
	AccountSequenceClient, ContractCallClient, EvmClient, KeypairLedgerClient, UtxoChangeClient,
};
use std::sync::Arc;

/// Client of one family, or nothing when that family has no wallet.
pub struct WalletState<C: ?Sized> {
	client: Option<Arc<C>>,
}

impl<C: ?Sized> WalletState<C> {
	pub fn ready(client: Arc<C>) -> Self {
		Self {
			client: Some(client),
		}
	}

	pub fn not_ready() -> Self {
		Self { client: None }
	}

	pub fn is_ready(&self) -> bool {
		self.client.is_some()
	}

	/// The family client, `None` while not ready.
	pub fn client(&self) -> Option<&Arc<C>> {
		self.client.as_ref()
	}
}

impl<C: ?Sized> Clone for WalletState<C> {
	fn clone(&self) -> Self {
		Self {
			client: self.client.clone(),
		}
	}
}

impl<C: ?Sized> Default for WalletState<C> {
	fn default() -> Self {
		Self::not_ready()
	}
}

/// Wallet state of every family, handed to the adapter factory.
#[derive(Clone, Default)]
pub struct WalletStates {
	pub evm: WalletState<dyn EvmClient>,
	pub keypair_ledger: WalletState<dyn KeypairLedgerClient>,
	pub utxo_change: WalletState<dyn UtxoChangeClient>,
	pub account_sequence: WalletState<dyn AccountSequenceClient>,
	pub contract_call: WalletState<dyn ContractCallClient>,
}
