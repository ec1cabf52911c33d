//! Connection and pool seams
//!
//! The engine never pools connections itself. A [`ConnectionPool`] hands out
//! exclusive [`Connection`]s; the driver adapters in [`crate::drivers`]
//! implement both traits over sqlx pools, and tests implement them with
//! recording mocks.

use crate::error::DatabaseError;
use crate::types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use std::sync::Arc;

/// An exclusive connection checked out of a pool
///
/// Dropping a connection returns it to its pool.
#[async_trait]
pub trait Connection: Send {
	fn database_type(&self) -> DatabaseType;

	/// Set the isolation level of the next transaction started on this connection
	async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), DatabaseError>;

	async fn begin(&mut self) -> Result<(), DatabaseError>;

	async fn commit(&mut self) -> Result<(), DatabaseError>;

	async fn rollback(&mut self) -> Result<(), DatabaseError>;

	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
	) -> Result<QueryResult, DatabaseError>;

	async fn fetch_all(&mut self, sql: &str, params: &[QueryValue])
	-> Result<Vec<Row>, DatabaseError>;

	/// Return the connection to its pool
	async fn release(self: Box<Self>);

	/// Close the connection instead of returning it to the pool
	///
	/// Used when the connection may be in an unknown state, e.g. after a
	/// timeout or a failed rollback.
	async fn discard(self: Box<Self>);
}

/// A source of exclusive connections
#[async_trait]
pub trait ConnectionPool: Send + Sync {
	/// Check out a connection, waiting while the pool is exhausted
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError>;
}

#[async_trait]
impl<P> ConnectionPool for Arc<P>
where
	P: ConnectionPool + ?Sized,
{
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError> {
		self.as_ref().acquire().await
	}
}
