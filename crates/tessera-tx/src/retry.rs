//! Retry classification and backoff

use crate::config::TransactionOptions;
use crate::error::Error;
use std::time::Duration;

/// Decides whether a failed attempt is retried and how long to wait before it
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tessera_tx::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.backoff(1), Duration::from_millis(100));
/// assert_eq!(policy.backoff(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	max_attempts: u32,
	base_delay: Duration,
}

impl RetryPolicy {
	/// Create a policy; `max_attempts` below one is treated as one
	pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			base_delay,
		}
	}

	pub fn from_options(options: &TransactionOptions) -> Self {
		Self::new(options.retry_attempts, options.retry_delay)
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub fn base_delay(&self) -> Duration {
		self.base_delay
	}

	/// Whether the error is transient
	///
	/// Transient conditions are connection reset, timeouts (driver, pool and
	/// transaction timeouts), host unreachable, lock wait timeout and
	/// deadlock. Wrapping errors are looked through.
	pub fn is_retryable(&self, error: &Error) -> bool {
		if let Error::Timeout { .. } = error.root_cause() {
			return true;
		}
		if let Error::Other(other) = error.root_cause()
			&& let Some(inner) = other.downcast_ref::<Error>()
		{
			return self.is_retryable(inner);
		}
		error
			.database_error()
			.is_some_and(|db| db.is_transient())
	}

	/// Delay before the attempt following `attempt`
	pub fn backoff(&self, attempt: u32) -> Duration {
		self.base_delay.saturating_mul(attempt)
	}

	/// Whether another attempt follows a failure of `attempt` with `error`
	pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
		attempt < self.max_attempts && self.is_retryable(error)
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_options(&TransactionOptions::default())
	}
}
