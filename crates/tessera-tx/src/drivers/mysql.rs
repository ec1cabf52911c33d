//! MySQL adapter

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionPool};
use crate::error::DatabaseError;
use crate::types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::{Column, Executor, MySql, Row as SqlxRow};

/// MySQL connection pool
#[derive(Debug, Clone)]
pub struct MySqlPool {
	pool: sqlx::MySqlPool,
}

impl MySqlPool {
	pub fn new(pool: sqlx::MySqlPool) -> Self {
		Self { pool }
	}

	/// Open a new sqlx pool
	pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, DatabaseError> {
		config.validate().map_err(super::invalid_pool_config)?;
		let pool = super::pool_options::<MySql>(config).connect(url).await?;
		Ok(Self::new(pool))
	}

	pub fn pool(&self) -> &sqlx::MySqlPool {
		&self.pool
	}
}

#[async_trait]
impl ConnectionPool for MySqlPool {
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError> {
		let conn = self.pool.acquire().await?;
		Ok(Box::new(MySqlConnection::new(conn)))
	}
}

/// Connection checked out of a [`MySqlPool`]
///
/// The isolation level is set with `SET TRANSACTION ISOLATION LEVEL` before
/// `BEGIN`, which applies it to the next transaction only.
pub struct MySqlConnection {
	conn: Option<PoolConnection<MySql>>,
	in_transaction: bool,
}

impl MySqlConnection {
	pub fn new(conn: PoolConnection<MySql>) -> Self {
		Self {
			conn: Some(conn),
			in_transaction: false,
		}
	}

	fn raw(&mut self) -> Result<&mut PoolConnection<MySql>, DatabaseError> {
		self.conn.as_mut().ok_or(DatabaseError::ConnectionClosed)
	}

	async fn control(&mut self, sql: &str) -> Result<(), DatabaseError> {
		let conn = self.raw()?;
		(&mut **conn).execute(sql).await?;
		Ok(())
	}

	fn bind_value<'q>(
		query: sqlx::query::Query<'q, MySql, MySqlArguments>,
		value: &'q QueryValue,
	) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
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

	fn convert_row(mysql_row: MySqlRow) -> Row {
		let mut row = Row::new();
		for column in mysql_row.columns() {
			let column_name = column.name();

			let value = if let Ok(value) = mysql_row.try_get::<bool, _>(column_name) {
				QueryValue::Bool(value)
			} else if let Ok(value) = mysql_row.try_get::<i64, _>(column_name) {
				QueryValue::Int(value)
			} else if let Ok(value) = mysql_row.try_get::<i32, _>(column_name) {
				QueryValue::Int(value as i64)
			} else if let Ok(value) = mysql_row.try_get::<f64, _>(column_name) {
				QueryValue::Float(value)
			} else if let Ok(value) = mysql_row.try_get::<String, _>(column_name) {
				QueryValue::String(value)
			} else if let Ok(value) = mysql_row.try_get::<Vec<u8>, _>(column_name) {
				// Binary-collation text columns come back as blobs
				match String::from_utf8(value) {
					Ok(s) => QueryValue::String(s),
					Err(e) => QueryValue::Bytes(e.into_bytes()),
				}
			} else if let Ok(value) = mysql_row.try_get::<chrono::NaiveDateTime, _>(column_name) {
				QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
					value,
					chrono::Utc,
				))
			} else if let Ok(value) =
				mysql_row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_name)
			{
				QueryValue::Timestamp(value)
			} else {
				QueryValue::Null
			};
			row.insert(column_name, value);
		}
		row
	}
}

#[async_trait]
impl Connection for MySqlConnection {
	fn database_type(&self) -> DatabaseType {
		DatabaseType::Mysql
	}

	async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), DatabaseError> {
		let sql = format!("SET TRANSACTION ISOLATION LEVEL {}", level.to_sql());
		self.control(&sql).await
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
			tracing::warn!("Releasing MySQL connection with an open transaction");
		}
		drop(self);
	}

	async fn discard(self: Box<Self>) {
		let mut this = self;
		this.in_transaction = false;
		if let Some(conn) = this.conn.take()
			&& let Err(error) = conn.close().await
		{
			tracing::debug!(%error, "Error while closing discarded MySQL connection");
		}
	}
}

impl Drop for MySqlConnection {
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
						tracing::warn!(%error, "Rollback of abandoned MySQL transaction failed");
						let _ = conn.close().await;
					}
				});
			}
			Err(_) => drop(conn.detach()),
		}
	}
}
