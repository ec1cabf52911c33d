//! # Tessera Transactions
//!
//! Transactional execution engine for Tessera.
//!
//! This crate runs units of work against a relational store with:
//! - **Retry**: transient failures (deadlocks, lock waits, connection resets,
//!   timeouts) are retried with linear backoff on a fresh connection
//! - **Isolation and timeouts**: per-call isolation level and upper bound on
//!   each attempt
//! - **Savepoints**: named, nested savepoints with partial rollback
//! - **Advisory locks**: named locks on MySQL and PostgreSQL
//! - **Batches**: ordered operations with per-operation savepoints and
//!   optional continue-on-error
//! - **Distributed transactions**: two-phase prepare/commit across external
//!   participants, with an optional transaction log
//!
//! Connection pooling is delegated to sqlx. Adapters for PostgreSQL, MySQL and
//! SQLite are available behind the `postgres`, `mysql` and `sqlite` features.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "postgres")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use tessera_tx::drivers::postgres::PostgresPool;
//! use tessera_tx::{IsolationLevel, PoolConfig, QueryValue, TransactionExecutor, TransactionOptions};
//!
//! let pool = PostgresPool::connect("postgres://localhost/billing", &PoolConfig::new()).await?;
//! let executor = TransactionExecutor::new(pool);
//!
//! let options = TransactionOptions::new()
//!     .with_isolation_level(IsolationLevel::Serializable)
//!     .with_timeout(Duration::from_secs(5));
//!
//! executor
//!     .execute_transaction(
//!         |tx| {
//!             Box::pin(async move {
//!                 tx.create_savepoint("before_adjustment").await?;
//!                 let adjusted = tx
//!                     .execute(
//!                         "UPDATE invoices SET total = total - $1 WHERE id = $2",
//!                         &[QueryValue::Int(40), QueryValue::Int(7)],
//!                     )
//!                     .await;
//!                 if adjusted.is_err() {
//!                     tx.rollback_to_savepoint("before_adjustment").await?;
//!                 }
//!                 tx.release_savepoint("before_adjustment").await?;
//!                 Ok::<_, tessera_tx::Error>(())
//!             })
//!         },
//!         &options,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod connection;
pub mod context;
pub mod distributed;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod types;

pub use batch::{BatchOperation, OperationOutcome, OperationOutput};
pub use config::{
	BatchOptions, ConfigError, DistributedOptions, EngineSettings, PoolConfig, TransactionOptions,
};
pub use connection::{Connection, ConnectionPool};
pub use context::{Savepoint, SavepointStack, TransactionContext};
pub use distributed::{
	DistributedCoordinator, DistributedTransactionError, Participant, ParticipantStatus,
};
pub use error::{DatabaseError, Error, Result, SavepointError, TransactionError};
pub use executor::{TransactionExecutor, TransactionFuture, TransactionHooks};
pub use registry::{TransactionId, TransactionRecord, TransactionRegistry, TransactionStatus};
pub use retry::RetryPolicy;
pub use types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
