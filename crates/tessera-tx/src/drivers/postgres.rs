//! PostgreSQL adapter

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionPool};
use crate::error::DatabaseError;
use crate::types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, Executor, PgPool, Postgres, Row as SqlxRow};

/// PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresPool {
	pool: PgPool,
}

impl PostgresPool {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Open a new sqlx pool
	pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, DatabaseError> {
		config.validate().map_err(super::invalid_pool_config)?;
		let pool = super::pool_options::<Postgres>(config).connect(url).await?;
		Ok(Self::new(pool))
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

#[async_trait]
impl ConnectionPool for PostgresPool {
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError> {
		let conn = self.pool.acquire().await?;
		Ok(Box::new(PostgresConnection::new(conn)))
	}
}

/// Connection checked out of a [`PostgresPool`]
///
/// The isolation level is applied as part of the `BEGIN` statement.
pub struct PostgresConnection {
	conn: Option<PoolConnection<Postgres>>,
	isolation_level: Option<IsolationLevel>,
	in_transaction: bool,
}

impl PostgresConnection {
	pub fn new(conn: PoolConnection<Postgres>) -> Self {
		Self {
			conn: Some(conn),
			isolation_level: None,
			in_transaction: false,
		}
	}

	fn raw(&mut self) -> Result<&mut PoolConnection<Postgres>, DatabaseError> {
		self.conn.as_mut().ok_or(DatabaseError::ConnectionClosed)
	}

	async fn control(&mut self, sql: &str) -> Result<(), DatabaseError> {
		let conn = self.raw()?;
		(&mut **conn).execute(sql).await?;
		Ok(())
	}

	fn bind_value<'q>(
		query: sqlx::query::Query<'q, Postgres, PgArguments>,
		value: &'q QueryValue,
	) -> sqlx::query::Query<'q, Postgres, PgArguments> {
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

	fn convert_row(pg_row: PgRow) -> Row {
		let mut row = Row::new();
		for column in pg_row.columns() {
			let column_name = column.name();

			let value = if let Ok(value) = pg_row.try_get::<bool, _>(column_name) {
				QueryValue::Bool(value)
			} else if let Ok(value) = pg_row.try_get::<i64, _>(column_name) {
				QueryValue::Int(value)
			} else if let Ok(value) = pg_row.try_get::<i32, _>(column_name) {
				QueryValue::Int(value as i64)
			} else if let Ok(value) = pg_row.try_get::<i16, _>(column_name) {
				QueryValue::Int(value as i64)
			} else if let Ok(value) = pg_row.try_get::<f64, _>(column_name) {
				QueryValue::Float(value)
			} else if let Ok(value) = pg_row.try_get::<f32, _>(column_name) {
				QueryValue::Float(value as f64)
			} else if let Ok(value) = pg_row.try_get::<String, _>(column_name) {
				QueryValue::String(value)
			} else if let Ok(value) = pg_row.try_get::<Vec<u8>, _>(column_name) {
				QueryValue::Bytes(value)
			} else if let Ok(value) =
				pg_row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_name)
			{
				QueryValue::Timestamp(value)
			} else if let Ok(value) = pg_row.try_get::<chrono::NaiveDateTime, _>(column_name) {
				QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
					value,
					chrono::Utc,
				))
			} else {
				QueryValue::Null
			};
			row.insert(column_name, value);
		}
		row
	}
}

#[async_trait]
impl Connection for PostgresConnection {
	fn database_type(&self) -> DatabaseType {
		DatabaseType::Postgres
	}

	async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), DatabaseError> {
		self.isolation_level = Some(level);
		Ok(())
	}

	async fn begin(&mut self) -> Result<(), DatabaseError> {
		let sql = match self.isolation_level.take() {
			Some(level) => format!("BEGIN TRANSACTION ISOLATION LEVEL {}", level.to_sql()),
			None => "BEGIN".to_string(),
		};
		self.control(&sql).await?;
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
			tracing::warn!("Releasing PostgreSQL connection with an open transaction");
		}
		drop(self);
	}

	async fn discard(self: Box<Self>) {
		let mut this = self;
		this.in_transaction = false;
		if let Some(conn) = this.conn.take()
			&& let Err(error) = conn.close().await
		{
			tracing::debug!(%error, "Error while closing discarded PostgreSQL connection");
		}
	}
}

impl Drop for PostgresConnection {
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
						tracing::warn!(%error, "Rollback of abandoned PostgreSQL transaction failed");
						let _ = conn.close().await;
					}
				});
			}
			Err(_) => drop(conn.detach()),
		}
	}
}
