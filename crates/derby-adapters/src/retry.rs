//! Bounded retry with exponential backoff under a single time budget.
//!
//! The timeout wraps the whole retry sequence, so the wall-clock cost of a
//! wrapped operation never exceeds the configured timeout no matter how many
//! attempts fit inside it.

use crate::AdapterError;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries after the first failed attempt.
	pub max_retries: u32,
	/// Delay before the first retry, doubled for each later one.
	pub base_delay: Duration,
	/// Budget for the whole sequence.
	pub timeout: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_secs(1),
			timeout: Duration::from_secs(30),
		}
	}
}

impl RetryPolicy {
	pub fn new(max_retries: u32, base_delay: Duration, timeout: Duration) -> Self {
		Self {
			max_retries,
			base_delay,
			timeout,
		}
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.base_delay)
			.with_multiplier(2.0)
			.with_randomization_factor(0.0)
			.with_max_interval(self.base_delay * 2u32.saturating_pow(self.max_retries))
			.with_max_elapsed_time(None)
			.build()
	}

	/// Runs `op` until it succeeds or `max_retries` retries are spent.
	///
	/// The error of the last attempt is returned on exhaustion.
	pub async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, AdapterError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		let mut backoff = self.backoff();
		let mut attempts = 0;

		loop {
			match op().await {
				Ok(value) => return Ok(value),
				Err(e) => {
					attempts += 1;
					if attempts > self.max_retries {
						return Err(e);
					}

					let delay = backoff.next_backoff().unwrap_or(self.base_delay);
					warn!(
						attempt = attempts,
						max_retries = self.max_retries,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"Operation failed, retrying"
					);
					tokio::time::sleep(delay).await;
				},
			}
		}
	}

	/// Races `fut` against the policy timeout.
	pub async fn with_timeout<T, Fut>(&self, fut: Fut) -> Result<T, AdapterError>
	where
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		tokio::time::timeout(self.timeout, fut)
			.await
			.map_err(|_| AdapterError::Timeout(self.timeout.as_millis() as u64))?
	}

	/// Retry sequence bounded by the timeout.
	pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, AdapterError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, AdapterError>>,
	{
		self.with_timeout(self.retry(op)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use tokio::time::Instant;

	#[tokio::test(start_paused = true)]
	async fn test_always_failing_call_stays_within_backoff_budget() {
		let policy = RetryPolicy::default();
		let attempts = AtomicU32::new(0);
		let counter = &attempts;
		let start = Instant::now();

		let result: Result<(), _> = policy
			.run(move || async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(AdapterError::Network("connection refused".into()))
			})
			.await;

		let elapsed = start.elapsed();
		assert_eq!(
			result,
			Err(AdapterError::Network("connection refused".into()))
		);
		// One initial attempt plus three retries
		assert_eq!(attempts.load(Ordering::SeqCst), 4);
		// 1s + 2s + 4s of backoff
		assert!(elapsed >= Duration::from_secs(7));
		assert!(elapsed < Duration::from_millis(7100));
	}

	#[tokio::test(start_paused = true)]
	async fn test_recovers_after_transient_failures() {
		let policy = RetryPolicy::default();
		let attempts = AtomicU32::new(0);
		let counter = &attempts;

		let result = policy
			.run(move || async move {
				if counter.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(AdapterError::Network("503".into()))
				} else {
					Ok(42u64)
				}
			})
			.await;

		assert_eq!(result, Ok(42));
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_timeout_covers_whole_retry_sequence() {
		let policy = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(15));
		let attempts = AtomicU32::new(0);
		let counter = &attempts;
		let start = Instant::now();

		let result: Result<(), _> = policy
			.run(move || async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(AdapterError::Network("unreachable".into()))
			})
			.await;

		assert_eq!(result, Err(AdapterError::Timeout(15_000)));
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
		assert!(start.elapsed() < Duration::from_millis(15_100));
	}

	#[tokio::test(start_paused = true)]
	async fn test_hung_call_times_out() {
		let policy = RetryPolicy::default();

		let result: Result<(), _> = policy
			.run(|| async {
				tokio::time::sleep(Duration::from_secs(3600)).await;
				Ok(())
			})
			.await;

		assert_eq!(result, Err(AdapterError::Timeout(30_000)));
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("timed out after 30000ms"));
	}
}
