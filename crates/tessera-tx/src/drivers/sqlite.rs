//! SQLite adapter

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionPool};
use crate::error::DatabaseError;
use crate::types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Executor, Row as SqlxRow, Sqlite, TypeInfo};

/// SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqlitePool {
	pool: sqlx::SqlitePool,
}

impl SqlitePool {
	pub fn new(pool: sqlx::SqlitePool) -> Self {
		Self { pool }
	}

	/// Open a new sqlx pool
	pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, DatabaseError> {
		config.validate().map_err(super::invalid_pool_config)?;
		let pool = super::pool_options::<Sqlite>(config).connect(url).await?;
		Ok(Self::new(pool))
	}

	pub fn pool(&self) -> &sqlx::SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl ConnectionPool for SqlitePool {
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError> {
		let conn = self.pool.acquire().await?;
		Ok(Box::new(SqliteConnection::new(conn)))
	}
}

/// Connection checked out of a [`SqlitePool`]
///
/// SQLite transactions are always serializable; the requested isolation
/// level is only logged.
pub struct SqliteConnection {
	conn: Option<PoolConnection<Sqlite>>,
	in_transaction: bool,
}

impl SqliteConnection {
	pub fn new(conn: PoolConnection<Sqlite>) -> Self {
		Self {
			conn: Some(conn),
			in_transaction: false,
		}
	}

	fn raw(&mut self) -> Result<&mut PoolConnection<Sqlite>, DatabaseError> {
		self.conn.as_mut().ok_or(DatabaseError::ConnectionClosed)
	}

	async fn control(&mut self, sql: &str) -> Result<(), DatabaseError> {
		let conn = self.raw()?;
		(&mut **conn).execute(sql).await?;
		Ok(())
	}

	fn bind_value<'q>(
		query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
		value: &'q QueryValue,
	) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
		match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
		}
	}

	fn convert_row(sqlite_row: SqliteRow) -> Row {
		let mut row = Row::new();
		for column in sqlite_row.columns() {
			let column_name = column.name();
			let type_name = column.type_info().name().to_uppercase();

			let is_null = sqlite_row
				.try_get_raw(column.ordinal())
				.map(|raw| sqlx::ValueRef::is_null(&raw))
				.unwrap_or(true);

			let value = if is_null {
				QueryValue::Null
			} else if type_name.contains("BOOL") {
				// Booleans are stored as 0/1 integers
				match sqlite_row.try_get::<i64, _>(column_name) {
					Ok(value) => QueryValue::Bool(value != 0),
					Err(_) => QueryValue::Null,
				}
			} else if let Ok(value) = sqlite_row.try_get::<i64, _>(column_name) {
				QueryValue::Int(value)
			} else if let Ok(value) = sqlite_row.try_get::<f64, _>(column_name) {
				QueryValue::Float(value)
			} else if let Ok(value) = sqlite_row.try_get::<String, _>(column_name) {
				QueryValue::String(value)
			} else if let Ok(value) = sqlite_row.try_get::<Vec<u8>, _>(column_name) {
				QueryValue::Bytes(value)
			} else {
				QueryValue::Null
			};
			row.insert(column_name, value);
		}
		row
	}
}

#[async_trait]
impl Connection for SqliteConnection {
	fn database_type(&self) -> DatabaseType {
		DatabaseType::Sqlite
	}

	async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), DatabaseError> {
		tracing::debug!(
			isolation_level = %level,
			"SQLite transactions are always serializable, ignoring isolation level"
		);
		Ok(())
	}

	async fn begin(&mut self) -> Result<(), DatabaseError> {
		self.control("BEGIN").await?;
		self.in_transaction = true;
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), DatabaseError> {
		self.control("COMMIT").await?;
		self.in_transaction = false;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), DatabaseError> {
		self.control("ROLLBACK").await?;
		self.in_transaction = false;
		Ok(())
	}

	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
	) -> Result<QueryResult, DatabaseError> {
		let conn = self.raw()?;
		let result = if params.is_empty() {
			(&mut **conn).execute(sql).await?
		} else {
			let mut query = sqlx::query(sql);
			for param in params {
				query = Self::bind_value(query, param);
			}
			query.execute(&mut **conn).await?
		};
		Ok(QueryResult {
			rows_affected: result.rows_affected(),
		})
	}

	async fn fetch_all(
		&mut self,
		sql: &str,
		params: &[QueryValue],
	) -> Result<Vec<Row>, DatabaseError> {
		let conn = self.raw()?;
		let rows = if params.is_empty() {
			(&mut **conn).fetch_all(sql).await?
		} else {
			let mut query = sqlx::query(sql);
			for param in params {
				query = Self::bind_value(query, param);
			}
			query.fetch_all(&mut **conn).await?
		};
		Ok(rows.into_iter().map(Self::convert_row).collect())
	}

	async fn release(self: Box<Self>) {
		if self.in_transaction {
			tracing::warn!("Releasing SQLite connection with an open transaction");
		}
		drop(self);
	}

	async fn discard(self: Box<Self>) {
		let mut this = self;
		this.in_transaction = false;
		if let Some(conn) = this.conn.take()
			&& let Err(error) = conn.close().await
		{
			tracing::debug!(%error, "Error while closing discarded SQLite connection");
		}
	}
}

impl Drop for SqliteConnection {
	fn drop(&mut self) {
		if !self.in_transaction {
			return;
		}
		let Some(mut conn) = self.conn.take() else {
			return;
		};

		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move {
					if let Err(error) = (&mut *conn).execute("ROLLBACK").await {
						tracing::warn!(%error, "Rollback of abandoned SQLite transaction failed");
						let _ = conn.close().await;
					}
				});
			}
			Err(_) => drop(conn.detach()),
		}
	}
}
