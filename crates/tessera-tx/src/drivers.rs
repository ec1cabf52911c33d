//! sqlx-backed pool adapters
//!
//! Each adapter wraps an existing sqlx pool (or opens one from a URL and a
//! [`PoolConfig`](crate::PoolConfig)) and hands out exclusive connections
//! implementing [`Connection`](crate::Connection). Pooling itself stays with
//! sqlx.
//!
//! Dropping an adapter connection while a transaction is open rolls the
//! transaction back in a background task before the connection returns to
//! its pool. Outside a tokio runtime the connection is closed instead.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub(crate) fn pool_options<DB: sqlx::Database>(
	config: &crate::config::PoolConfig,
) -> sqlx::pool::PoolOptions<DB> {
	sqlx::pool::PoolOptions::new()
		.max_connections(config.max_connections)
		.min_connections(config.min_connections)
		.acquire_timeout(config.acquire_timeout)
		.max_lifetime(config.max_lifetime)
		.idle_timeout(config.idle_timeout)
		.test_before_acquire(config.test_before_acquire)
}

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub(crate) fn invalid_pool_config(error: crate::config::ConfigError) -> crate::error::DatabaseError {
	crate::error::DatabaseError::Connection(format!("invalid pool configuration: {}", error))
}
