//! Batch execution
//!
//! Runs a list of operations in order inside a single transaction. With
//! savepoints enabled each operation gets its own savepoint (`op_<index>`),
//! so a failed operation can be undone without touching the ones before it.

use crate::config::BatchOptions;
use crate::context::TransactionContext;
use crate::error::{Error, Result, TransactionError};
use crate::executor::{TransactionExecutor, TransactionFuture};
use crate::types::{QueryResult, QueryValue};
use std::sync::Arc;

type OperationFn<T> =
	Arc<dyn for<'c> Fn(&'c mut TransactionContext) -> TransactionFuture<'c, T> + Send + Sync>;

/// One element of a batch
pub enum BatchOperation<T> {
	/// Arbitrary work on the transaction context
	Callback(OperationFn<T>),
	/// A single parameterized statement
	Statement {
		sql: String,
		params: Vec<QueryValue>,
	},
}

impl<T> BatchOperation<T> {
	pub fn callback<F>(f: F) -> Self
	where
		F: for<'c> Fn(&'c mut TransactionContext) -> TransactionFuture<'c, T> + Send + Sync + 'static,
	{
		BatchOperation::Callback(Arc::new(f))
	}

	pub fn statement(sql: impl Into<String>, params: Vec<QueryValue>) -> Self {
		BatchOperation::Statement {
			sql: sql.into(),
			params,
		}
	}

	async fn run(&self, ctx: &mut TransactionContext) -> Result<OperationOutput<T>> {
		match self {
			BatchOperation::Callback(f) => f(ctx).await.map(OperationOutput::Value),
			BatchOperation::Statement { sql, params } => {
				ctx.execute(sql, params).await.map(OperationOutput::Statement)
			}
		}
	}
}

impl<T> std::fmt::Debug for BatchOperation<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			BatchOperation::Callback(_) => f.write_str("Callback(..)"),
			BatchOperation::Statement { sql, params } => f
				.debug_struct("Statement")
				.field("sql", sql)
				.field("params", params)
				.finish(),
		}
	}
}

/// Output of a successful operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput<T> {
	Value(T),
	Statement(QueryResult),
}

/// Result of one batch operation, tagged with its position in the batch
#[derive(Debug)]
pub struct OperationOutcome<T> {
	pub index: usize,
	pub result: Result<OperationOutput<T>>,
}

impl<T> OperationOutcome<T> {
	pub fn is_success(&self) -> bool {
		self.result.is_ok()
	}

	pub fn error(&self) -> Option<&Error> {
		self.result.as_ref().err()
	}
}

impl TransactionExecutor {
	/// Run `operations` in order inside one transaction
	///
	/// Without `continue_on_error` the first failure aborts the transaction,
	/// which is then rolled back and possibly retried as a whole. With it,
	/// failures are recorded in the returned outcomes and the transaction
	/// still commits.
	///
	/// # Examples
	///
	/// ```no_run
	/// # async fn example(executor: tessera_tx::TransactionExecutor) -> Result<(), tessera_tx::TransactionError> {
	/// use tessera_tx::{BatchOperation, BatchOptions, QueryValue};
	///
	/// let operations: Vec<BatchOperation<()>> = vec![
	///     BatchOperation::statement("INSERT INTO claims (id) VALUES (?)", vec![QueryValue::Int(1)]),
	///     BatchOperation::statement("INSERT INTO claims (id) VALUES (?)", vec![QueryValue::Int(1)]),
	/// ];
	/// let options = BatchOptions::new()
	///     .with_continue_on_error(true)
	///     .with_savepoints(true);
	///
	/// let outcomes = executor.execute_batch(operations, &options).await?;
	/// assert!(outcomes[0].is_success());
	/// assert!(!outcomes[1].is_success());
	/// # Ok(())
	/// # }
	/// ```
	pub async fn execute_batch<T>(
		&self,
		operations: Vec<BatchOperation<T>>,
		options: &BatchOptions,
	) -> Result<Vec<OperationOutcome<T>>, TransactionError>
	where
		T: Send + 'static,
	{
		let operations: Arc<[BatchOperation<T>]> = operations.into();
		let continue_on_error = options.continue_on_error;
		let savepoints = options.savepoints;

		self.execute_transaction(
			move |ctx| {
				let operations = Arc::clone(&operations);
				Box::pin(async move {
					run_operations(ctx, &operations, continue_on_error, savepoints).await
				})
			},
			&options.transaction,
		)
		.await
	}
}

async fn run_operations<T>(
	ctx: &mut TransactionContext,
	operations: &[BatchOperation<T>],
	continue_on_error: bool,
	savepoints: bool,
) -> Result<Vec<OperationOutcome<T>>> {
	let mut outcomes = Vec::with_capacity(operations.len());

	for (index, operation) in operations.iter().enumerate() {
		let savepoint = savepoints.then(|| format!("op_{}", index));
		if let Some(name) = &savepoint {
			ctx.create_savepoint(name).await?;
		}

		match operation.run(ctx).await {
			Ok(output) => {
				if let Some(name) = &savepoint {
					ctx.release_savepoint(name).await?;
				}
				outcomes.push(OperationOutcome {
					index,
					result: Ok(output),
				});
			}
			Err(error) => {
				if let Some(name) = &savepoint {
					// A failed rollback-to aborts the whole batch
					if let Err(rollback_error) = ctx.rollback_to_savepoint(name).await {
						tracing::warn!(
							transaction_id = %ctx.transaction_id(),
							index,
							%error,
							"Operation failed and its savepoint could not be restored"
						);
						return Err(rollback_error);
					}
					ctx.release_savepoint(name).await?;
				}

				if !continue_on_error {
					return Err(error);
				}
				tracing::warn!(
					transaction_id = %ctx.transaction_id(),
					index,
					%error,
					"Batch operation failed, continuing"
				);
				outcomes.push(OperationOutcome {
					index,
					result: Err(error),
				});
			}
		}
	}

	Ok(outcomes)
}
