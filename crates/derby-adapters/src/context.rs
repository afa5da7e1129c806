//! State and helpers shared by every family adapter.

use crate::{AdapterError, ErrorFormatter, RetryPolicy};
use derby_types::{ChainBalance, ChainDescriptor, TransactionResult};
use std::future::Future;
use tokio::time::Instant;

/// Descriptor, retry policy and error table of one adapter.
#[derive(Debug, Clone)]
pub struct AdapterContext {
	pub descriptor: ChainDescriptor,
	pub policy: RetryPolicy,
	formatter: ErrorFormatter,
}

impl AdapterContext {
	pub fn new(descriptor: ChainDescriptor, policy: RetryPolicy, formatter: ErrorFormatter) -> Self {
		Self {
			descriptor,
			policy,
			formatter,
		}
	}

	/// Runs a network read under the retry policy and its timeout.
	pub async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, AdapterError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		self.policy.run(op).await
	}

	pub fn format_error(&self, error: &AdapterError) -> String {
		self.formatter.format(&error.to_string())
	}

	/// Balance of `raw` base units judged against the chain threshold.
	pub fn balance(&self, raw: u128) -> ChainBalance {
		ChainBalance::evaluate(
			self.descriptor.id.clone(),
			raw,
			self.descriptor.min_balance(),
		)
	}

	pub fn balance_error(&self, error: &AdapterError) -> ChainBalance {
		tracing::warn!(
			chain = %self.descriptor.name,
			error = %error,
			"Balance check failed"
		);
		ChainBalance::failed(self.descriptor.id.clone(), self.format_error(error))
	}

	pub fn success(&self, started: Instant, hash: impl Into<String>) -> TransactionResult {
		TransactionResult::success(elapsed_ms(started), hash)
	}

	pub fn failure(&self, started: Instant, error: &AdapterError) -> TransactionResult {
		TransactionResult::failure(elapsed_ms(started), self.format_error(error))
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	started.elapsed().as_millis() as u64
}
