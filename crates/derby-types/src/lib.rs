//! Common types for the Chain Derby race system.
//!
//! Shared data model used by the adapters, the race orchestrator and the
//! persistence collaborators. Keeping these in one crate lets every
//! component agree on chain identity, result shapes and event payloads.

/// Balance snapshots taken before a race.
pub mod balance;
/// Chain descriptors and their classification into families.
pub mod chain;
/// Events emitted by the race orchestrator.
pub mod events;
/// Per-chain race progress and transaction outcomes.
pub mod race;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Secure string type for private keys and tokens.
pub mod secret_string;
/// Finished race summaries handed to persistence.
pub mod session;
/// Utility functions for common formatting.
pub mod utils;
/// Configuration validation types.
pub mod validation;

pub use balance::ChainBalance;
pub use chain::{
	AccountSequenceChain, ChainDescriptor, ChainFamily, ChainFamilyKind, ChainId, Commitment,
	ContractCallChain, DescriptorError, EvmChain, EvmSubmission, KeypairLedgerChain, Layer,
	UtxoChangeChain, DEFAULT_FEE_TOKEN,
};
pub use events::RaceEvent;
pub use race::{
	RacePhase, RaceResult, RaceStatus, TransactionReceipt, TransactionResult,
	ALLOWED_TRANSACTION_COUNTS, SKIPPED_MESSAGE, SKIPPED_POSITION,
};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use session::{ChainSessionResult, GeoInfo, RaceSessionSummary};
pub use utils::{truncate_id, with_0x_prefix};
pub use validation::*;
