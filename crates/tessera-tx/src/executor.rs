//! Transaction executor
//!
//! [`TransactionExecutor::execute_transaction`] runs a unit of work inside a
//! database transaction:
//!
//! 1. acquire a connection, set the isolation level and `BEGIN`
//! 2. race the unit of work against the transaction timeout
//! 3. `COMMIT` on success, `ROLLBACK` on failure or timeout
//! 4. retry transient failures with linear backoff on a fresh connection
//!
//! The connection is released (or discarded) and the registry entry removed
//! on every exit path.
//!
//! # Cancellation
//!
//! A timeout drops the unit-of-work future. Cancellation therefore takes
//! effect at the next await point: a statement already sent to the server may
//! still complete there. The executor does not wait for it. The timed-out
//! connection is handed to a background task that issues `ROLLBACK` and then
//! closes it, so it never returns to the pool.

use crate::config::TransactionOptions;
use crate::connection::{Connection, ConnectionPool};
use crate::context::TransactionContext;
use crate::error::{Error, Result, TransactionError};
use crate::registry::{
	RegistryEntryGuard, TransactionId, TransactionRecord, TransactionRegistry, TransactionStatus,
};
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Future returned by a unit of work
pub type TransactionFuture<'c, T> = BoxFuture<'c, Result<T>>;

type CommitHook<T> = Box<dyn Fn(&TransactionId, &T) + Send + Sync>;
type RollbackHook = Box<dyn Fn(&TransactionId, &Error) + Send + Sync>;

/// Callbacks invoked after a transaction attempt ends
///
/// `on_commit` runs once the commit succeeded. `on_rollback` runs after each
/// successful rollback, including rollbacks of attempts that are retried. For
/// a timed-out attempt it runs as soon as the rollback is handed off.
pub struct TransactionHooks<T> {
	on_commit: Option<CommitHook<T>>,
	on_rollback: Option<RollbackHook>,
}

impl<T> TransactionHooks<T> {
	pub fn new() -> Self {
		Self {
			on_commit: None,
			on_rollback: None,
		}
	}

	pub fn on_commit(mut self, hook: impl Fn(&TransactionId, &T) + Send + Sync + 'static) -> Self {
		self.on_commit = Some(Box::new(hook));
		self
	}

	pub fn on_rollback(
		mut self,
		hook: impl Fn(&TransactionId, &Error) + Send + Sync + 'static,
	) -> Self {
		self.on_rollback = Some(Box::new(hook));
		self
	}

	fn committed(&self, id: &TransactionId, value: &T) {
		if let Some(hook) = &self.on_commit {
			hook(id, value);
		}
	}

	fn rolled_back(&self, id: &TransactionId, error: &Error) {
		if let Some(hook) = &self.on_rollback {
			hook(id, error);
		}
	}
}

impl<T> Default for TransactionHooks<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> std::fmt::Debug for TransactionHooks<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransactionHooks")
			.field("on_commit", &self.on_commit.is_some())
			.field("on_rollback", &self.on_rollback.is_some())
			.finish()
	}
}

/// Runs units of work inside transactions
///
/// Cloning an executor shares its pool and registry.
///
/// # Examples
///
/// ```no_run
/// # #[cfg(feature = "sqlite")]
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use tessera_tx::drivers::sqlite::SqlitePool;
/// use tessera_tx::{PoolConfig, QueryValue, TransactionExecutor, TransactionOptions};
///
/// let pool = SqlitePool::connect("sqlite::memory:", &PoolConfig::new()).await?;
/// let executor = TransactionExecutor::new(pool);
///
/// let balance: i64 = executor
///     .execute_transaction(
///         |tx| {
///             Box::pin(async move {
///                 tx.execute(
///                     "UPDATE accounts SET balance = balance - ? WHERE id = ?",
///                     &[QueryValue::Int(125), QueryValue::Int(1)],
///                 )
///                 .await?;
///                 let row = tx
///                     .fetch_one("SELECT balance FROM accounts WHERE id = ?", &[QueryValue::Int(1)])
///                     .await?;
///                 Ok::<_, tessera_tx::Error>(row.get::<i64>("balance")?)
///             })
///         },
///         &TransactionOptions::new(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TransactionExecutor {
	pool: Arc<dyn ConnectionPool>,
	registry: TransactionRegistry,
}

impl TransactionExecutor {
	/// Create an executor with a private registry
	pub fn new<P>(pool: P) -> Self
	where
		P: ConnectionPool + 'static,
	{
		Self {
			pool: Arc::new(pool),
			registry: TransactionRegistry::new(),
		}
	}

	/// Use a shared registry instead of the private one
	pub fn with_registry(mut self, registry: TransactionRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn registry(&self) -> &TransactionRegistry {
		&self.registry
	}

	/// Run `callback` inside a transaction, retrying transient failures
	///
	/// The callback is invoked once per attempt with a fresh context.
	pub async fn execute_transaction<T, F>(
		&self,
		callback: F,
		options: &TransactionOptions,
	) -> Result<T, TransactionError>
	where
		T: Send,
		F: for<'c> FnMut(&'c mut TransactionContext) -> TransactionFuture<'c, T> + Send,
	{
		self.execute_transaction_with_hooks(callback, options, &TransactionHooks::new())
			.await
	}

	/// Same as [`execute_transaction`](Self::execute_transaction), with lifecycle hooks
	pub async fn execute_transaction_with_hooks<T, F>(
		&self,
		mut callback: F,
		options: &TransactionOptions,
		hooks: &TransactionHooks<T>,
	) -> Result<T, TransactionError>
	where
		T: Send,
		F: for<'c> FnMut(&'c mut TransactionContext) -> TransactionFuture<'c, T> + Send,
	{
		let transaction_id = TransactionId::new();
		if let Err(error) = options.validate() {
			return Err(TransactionError::new(
				transaction_id,
				0,
				options.isolation_level,
				Error::Config(error),
			));
		}

		let policy = RetryPolicy::from_options(options);
		let mut attempt = 0;

		loop {
			attempt += 1;

			let error = match self
				.run_attempt(&transaction_id, attempt, &mut callback, options, hooks)
				.await
			{
				Ok(value) => return Ok(value),
				Err(error) => error,
			};

			if !policy.should_retry(&error, attempt) {
				tracing::debug!(
					transaction_id = %transaction_id,
					attempt,
					%error,
					"Transaction failed"
				);
				return Err(TransactionError::new(
					transaction_id,
					attempt,
					options.isolation_level,
					error,
				));
			}

			let delay = policy.backoff(attempt);
			tracing::warn!(
				transaction_id = %transaction_id,
				attempt,
				max_attempts = policy.max_attempts(),
				?delay,
				%error,
				"Retrying transaction after transient failure"
			);
			tokio::time::sleep(delay).await;
		}
	}

	async fn run_attempt<T, F>(
		&self,
		transaction_id: &TransactionId,
		attempt: u32,
		callback: &mut F,
		options: &TransactionOptions,
		hooks: &TransactionHooks<T>,
	) -> Result<T>
	where
		T: Send,
		F: for<'c> FnMut(&'c mut TransactionContext) -> TransactionFuture<'c, T> + Send,
	{
		let mut connection = self
			.pool
			.acquire()
			.await
			.map_err(Error::ConnectionAcquisition)?;

		if let Err(error) = start(connection.as_mut(), options).await {
			connection.discard().await;
			return Err(error.into());
		}

		self.registry.track_transaction(
			TransactionRecord::new(
				transaction_id.clone(),
				options.isolation_level,
				attempt,
				connection.database_type(),
			)
			.activate(),
		);
		let guard = RegistryEntryGuard::new(self.registry.clone(), transaction_id.clone());
		tracing::debug!(
			transaction_id = %transaction_id,
			attempt,
			isolation_level = %options.isolation_level,
			"Transaction started"
		);

		let mut ctx =
			TransactionContext::new(transaction_id.clone(), options.isolation_level, attempt, connection);

		let outcome = tokio::time::timeout(options.timeout, callback(&mut ctx)).await;
		let cause = match outcome {
			Ok(Ok(value)) => match ctx.connection().commit().await {
				Ok(()) => {
					self.mark(transaction_id, TransactionStatus::Committed);
					ctx.release_held_locks().await;
					ctx.into_connection().release().await;
					drop(guard);

					tracing::debug!(transaction_id = %transaction_id, attempt, "Transaction committed");
					hooks.committed(transaction_id, &value);
					return Ok(value);
				}
				Err(error) => Error::Database(error),
			},
			Ok(Err(error)) => error,
			Err(_) => {
				let cause = Error::Timeout {
					transaction_id: transaction_id.clone(),
					timeout: options.timeout,
				};
				tracing::warn!(
					transaction_id = %transaction_id,
					attempt,
					timeout = ?options.timeout,
					"Transaction timed out"
				);
				self.mark(transaction_id, TransactionStatus::RolledBack);
				abandon(ctx.into_connection(), transaction_id.clone());
				drop(guard);

				hooks.rolled_back(transaction_id, &cause);
				return Err(cause);
			}
		};

		match ctx.connection().rollback().await {
			Ok(()) => {
				self.mark(transaction_id, TransactionStatus::RolledBack);
				ctx.release_held_locks().await;
				ctx.into_connection().release().await;
				drop(guard);

				tracing::debug!(
					transaction_id = %transaction_id,
					attempt,
					error = %cause,
					"Transaction rolled back"
				);
				hooks.rolled_back(transaction_id, &cause);
				Err(cause)
			}
			Err(rollback_error) => {
				tracing::error!(
					transaction_id = %transaction_id,
					attempt,
					error = %cause,
					%rollback_error,
					"Rollback failed"
				);
				self.mark(transaction_id, TransactionStatus::Failed);
				ctx.into_connection().discard().await;
				drop(guard);

				Err(Error::RollbackFailed {
					transaction_id: transaction_id.clone(),
					cause: Box::new(cause),
					rollback_error,
				})
			}
		}
	}

	fn mark(&self, transaction_id: &TransactionId, status: TransactionStatus) {
		if let Err(error) = self.registry.update_status(transaction_id, status) {
			tracing::warn!(transaction_id = %transaction_id, %error, "Failed to update transaction status");
		}
	}
}

async fn start(
	connection: &mut dyn Connection,
	options: &TransactionOptions,
) -> Result<(), crate::error::DatabaseError> {
	connection
		.set_isolation_level(options.isolation_level)
		.await?;
	connection.begin().await
}

/// Roll back and close a connection whose statement may still be running
///
/// Both steps queue behind the in-flight statement, so they run on a
/// separate task. Closing the session aborts the transaction even when the
/// `ROLLBACK` itself fails.
fn abandon(mut connection: Box<dyn Connection>, transaction_id: TransactionId) {
	tokio::spawn(async move {
		if let Err(error) = connection.rollback().await {
			tracing::warn!(
				transaction_id = %transaction_id,
				%error,
				"Rollback of timed-out transaction failed"
			);
		}
		connection.discard().await;
		tracing::debug!(transaction_id = %transaction_id, "Timed-out connection closed");
	});
}

impl std::fmt::Debug for TransactionExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransactionExecutor")
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}
