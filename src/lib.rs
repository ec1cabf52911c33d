//! # Tessera
//!
//! Transactional execution engine for relational stores.
//!
//! Tessera runs units of work inside database transactions and takes care of
//! the parts that are easy to get wrong by hand: retrying transient
//! failures on a fresh connection, bounding each attempt with a timeout,
//! rolling back on every failure path, nested savepoints, advisory locks,
//! ordered batches and two-phase commit across external participants.
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL adapter
//! - `mysql` (default) - MySQL adapter
//! - `sqlite` (default) - SQLite adapter
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use tessera::prelude::*;
//! use tessera::drivers::sqlite::SqlitePool;
//!
//! let pool = SqlitePool::connect("sqlite://ledger.db", &PoolConfig::new()).await?;
//! let executor = TransactionExecutor::new(pool);
//!
//! let moved = executor
//!     .execute_transaction(
//!         |tx| {
//!             Box::pin(async move {
//!                 let debit = tx
//!                     .execute(
//!                         "UPDATE accounts SET balance = balance - ? WHERE id = ?",
//!                         &[QueryValue::Int(25), QueryValue::Int(1)],
//!                     )
//!                     .await?;
//!                 tx.execute(
//!                     "UPDATE accounts SET balance = balance + ? WHERE id = ?",
//!                     &[QueryValue::Int(25), QueryValue::Int(2)],
//!                 )
//!                 .await?;
//!                 Ok::<_, tessera::Error>(debit.rows_affected)
//!             })
//!         },
//!         &TransactionOptions::default(),
//!     )
//!     .await?;
//! assert_eq!(moved, 1);
//! # Ok(())
//! # }
//! ```

pub use tessera_tx::{
	batch, config, connection, context, distributed, drivers, error, executor, registry, retry,
	types,
};

pub use tessera_tx::{
	BatchOperation, BatchOptions, ConfigError, Connection, ConnectionPool, DatabaseError,
	DatabaseType, DistributedCoordinator, DistributedOptions, DistributedTransactionError,
	EngineSettings, Error, IsolationLevel, OperationOutcome, OperationOutput, Participant,
	ParticipantStatus, PoolConfig, QueryResult, QueryValue, Result, RetryPolicy, Row, Savepoint,
	SavepointError, SavepointStack, TransactionContext, TransactionError, TransactionExecutor,
	TransactionFuture, TransactionHooks, TransactionId, TransactionOptions, TransactionRecord,
	TransactionRegistry, TransactionStatus,
};

/// Commonly used types
pub mod prelude {
	pub use crate::{
		BatchOperation, BatchOptions, DistributedCoordinator, DistributedOptions, Error,
		IsolationLevel, Participant, PoolConfig, QueryValue, Result, TransactionContext,
		TransactionExecutor, TransactionFuture, TransactionHooks, TransactionId,
		TransactionOptions,
	};
}
