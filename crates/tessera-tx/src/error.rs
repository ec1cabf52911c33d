//! Error types for the transactional execution engine.
//!
//! Driver failures are normalized into [`DatabaseError`] so that the retry
//! policy can classify them without knowing which backend produced them.

use crate::config::ConfigError;
use crate::registry::{TransactionId, TransactionStatus};
use crate::types::IsolationLevel;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a connection or its driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
	/// The peer reset or aborted the connection.
	#[error("Connection reset: {0}")]
	ConnectionReset(String),

	/// An operation (including pool acquisition) timed out.
	#[error("Operation timed out: {0}")]
	Timeout(String),

	/// The database host could not be reached.
	#[error("Host unreachable: {0}")]
	HostUnreachable(String),

	/// Waiting for a row or table lock exceeded the server limit.
	#[error("Lock wait timeout exceeded: {0}")]
	LockWaitTimeout(String),

	/// The server chose this transaction as a deadlock victim.
	#[error("Deadlock detected: {0}")]
	Deadlock(String),

	/// Any other connection-level failure.
	#[error("Connection error: {0}")]
	Connection(String),

	/// The connection or pool was already closed.
	#[error("Connection closed")]
	ConnectionClosed,

	/// A query expected a row but returned none.
	#[error("Row not found")]
	RowNotFound,

	/// A requested column does not exist in the row.
	#[error("Column not found: {0}")]
	ColumnNotFound(String),

	/// A column value could not be converted to the requested type.
	#[error("Type error: {0}")]
	TypeError(String),

	/// The backend does not support the requested operation.
	#[error("Unsupported operation: {0}")]
	Unsupported(String),

	/// The server rejected a statement.
	#[error("Query error{}: {message}", code_suffix(.code))]
	Query {
		/// Vendor error code or SQLSTATE, when reported.
		code: Option<String>,
		/// Server message.
		message: String,
	},
}

impl DatabaseError {
	/// Build an error from a vendor error code.
	///
	/// Known lock and deadlock codes for MySQL, PostgreSQL and SQLite are
	/// mapped to their dedicated variants, together with the symbolic codes
	/// produced by socket-level failures.
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::DatabaseError;
	///
	/// let err = DatabaseError::from_code(Some("40P01"), "deadlock detected");
	/// assert!(matches!(err, DatabaseError::Deadlock(_)));
	///
	/// let err = DatabaseError::from_code(Some("23505"), "duplicate key");
	/// assert!(matches!(err, DatabaseError::Query { .. }));
	/// ```
	pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
		let message = message.into();
		match code {
			Some("1213" | "40P01" | "ER_LOCK_DEADLOCK") => DatabaseError::Deadlock(message),
			Some("1205" | "55P03" | "5" | "ER_LOCK_WAIT_TIMEOUT") => {
				DatabaseError::LockWaitTimeout(message)
			}
			Some("ECONNRESET") => DatabaseError::ConnectionReset(message),
			Some("ETIMEDOUT") => DatabaseError::Timeout(message),
			Some("EHOSTUNREACH") => DatabaseError::HostUnreachable(message),
			_ => DatabaseError::Query {
				code: code.map(str::to_string),
				message,
			},
		}
	}

	/// Build an error from a MySQL server error number.
	///
	/// The SQLSTATE MySQL reports for deadlocks (`40001`) and lock wait
	/// timeouts (`HY000`) is shared with unrelated errors, so only the error
	/// number identifies them. `sql_state` is kept as the code of any other
	/// error.
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::DatabaseError;
	///
	/// let err = DatabaseError::from_mysql_number(1213, Some("40001"), "Deadlock found");
	/// assert!(err.is_transient());
	/// ```
	pub fn from_mysql_number(
		number: u16,
		sql_state: Option<&str>,
		message: impl Into<String>,
	) -> Self {
		let message = message.into();
		match number {
			1213 => DatabaseError::Deadlock(message),
			1205 => DatabaseError::LockWaitTimeout(message),
			_ => DatabaseError::Query {
				code: Some(sql_state.map_or_else(|| number.to_string(), str::to_string)),
				message,
			},
		}
	}

	/// Build an error from a SQLite result code.
	///
	/// SQLite reports extended result codes, whose low byte is the primary
	/// code. `SQLITE_BUSY` (5) and `SQLITE_LOCKED` (6) map to
	/// [`DatabaseError::LockWaitTimeout`] whatever their extended form.
	pub fn from_sqlite_code(code: Option<&str>, message: impl Into<String>) -> Self {
		let message = message.into();
		let primary = code.and_then(|c| c.parse::<i64>().ok()).map(|c| c & 0xff);
		match primary {
			Some(5 | 6) => DatabaseError::LockWaitTimeout(message),
			_ => DatabaseError::Query {
				code: code.map(str::to_string),
				message,
			},
		}
	}

	/// Whether the failure belongs to the fixed set of transient conditions.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			DatabaseError::ConnectionReset(_)
				| DatabaseError::Timeout(_)
				| DatabaseError::HostUnreachable(_)
				| DatabaseError::LockWaitTimeout(_)
				| DatabaseError::Deadlock(_)
		)
	}
}

impl From<sqlx::Error> for DatabaseError {
	fn from(error: sqlx::Error) -> Self {
		use std::io::ErrorKind;

		match error {
			sqlx::Error::PoolTimedOut => {
				DatabaseError::Timeout("timed out waiting for a pooled connection".to_string())
			}
			sqlx::Error::PoolClosed => DatabaseError::ConnectionClosed,
			sqlx::Error::RowNotFound => DatabaseError::RowNotFound,
			sqlx::Error::ColumnNotFound(name) => DatabaseError::ColumnNotFound(name),
			sqlx::Error::Io(io) => match io.kind() {
				ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
					DatabaseError::ConnectionReset(io.to_string())
				}
				ErrorKind::TimedOut => DatabaseError::Timeout(io.to_string()),
				ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
					DatabaseError::HostUnreachable(io.to_string())
				}
				_ => DatabaseError::Connection(io.to_string()),
			},
			sqlx::Error::Database(db) => {
				#[cfg(feature = "mysql")]
				if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
					return DatabaseError::from_mysql_number(
						mysql.number(),
						mysql.code(),
						mysql.message(),
					);
				}

				let code = db.code().map(|c| c.into_owned());

				#[cfg(feature = "sqlite")]
				if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
					return DatabaseError::from_sqlite_code(code.as_deref(), db.message());
				}

				DatabaseError::from_code(code.as_deref(), db.message())
			}
			other => DatabaseError::Query {
				code: None,
				message: other.to_string(),
			},
		}
	}
}

fn code_suffix(code: &Option<String>) -> String {
	code.as_deref()
		.map(|c| format!(" [{}]", c))
		.unwrap_or_default()
}

/// Errors raised while managing savepoints.
#[derive(Debug, Error)]
pub enum SavepointError {
	/// The name is not a plain identifier.
	#[error("Invalid savepoint name '{0}': only alphanumeric characters and underscores are allowed, and it must not start with a digit")]
	InvalidName(String),

	/// A savepoint with this name is already on the stack.
	#[error("Savepoint '{0}' already exists in this transaction")]
	Duplicate(String),

	/// No savepoint with this name is on the stack.
	#[error("Savepoint '{0}' not found")]
	NotFound(String),

	/// The database rejected the savepoint statement.
	#[error("Savepoint '{name}' failed: {source}")]
	Database {
		name: String,
		#[source]
		source: DatabaseError,
	},
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
	/// No connection could be obtained from the pool.
	#[error("Failed to acquire connection: {0}")]
	ConnectionAcquisition(#[source] DatabaseError),

	#[error(transparent)]
	Database(#[from] DatabaseError),

	/// The unit of work did not finish before the transaction timeout.
	#[error("Transaction {transaction_id} timed out after {timeout:?}")]
	Timeout {
		transaction_id: TransactionId,
		timeout: Duration,
	},

	/// Rolling back failed. `cause` is the error that triggered the rollback.
	#[error("Rollback of transaction {transaction_id} failed ({rollback_error}) after: {cause}")]
	RollbackFailed {
		transaction_id: TransactionId,
		#[source]
		cause: Box<Error>,
		rollback_error: DatabaseError,
	},

	#[error(transparent)]
	Savepoint(#[from] SavepointError),

	#[error("Transaction {0} is not registered")]
	TransactionNotFound(TransactionId),

	#[error("Transaction {transaction_id} cannot move from {from} to {to}")]
	InvalidStatusTransition {
		transaction_id: TransactionId,
		from: TransactionStatus,
		to: TransactionStatus,
	},

	/// Options were rejected before any connection was acquired.
	#[error("Invalid configuration: {0}")]
	Config(#[from] ConfigError),

	/// Error raised by caller code inside a unit of work.
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl Error {
	/// The error that originally triggered a failure.
	///
	/// Looks through [`Error::RollbackFailed`] so that callers see the
	/// triggering error rather than the secondary rollback failure.
	pub fn root_cause(&self) -> &Error {
		match self {
			Error::RollbackFailed { cause, .. } => cause.root_cause(),
			other => other,
		}
	}

	/// The database error carried by this error, if any.
	pub fn database_error(&self) -> Option<&DatabaseError> {
		match self {
			Error::ConnectionAcquisition(db) | Error::Database(db) => Some(db),
			Error::Savepoint(SavepointError::Database { source, .. }) => Some(source),
			Error::RollbackFailed { cause, .. } => cause.database_error(),
			Error::Other(other) => other.downcast_ref::<DatabaseError>().or_else(|| {
				other
					.downcast_ref::<Error>()
					.and_then(Error::database_error)
			}),
			_ => None,
		}
	}
}

/// Result type alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Final error of a transaction that could not be committed.
#[derive(Debug, Error)]
#[error(
	"Transaction {transaction_id} failed after {attempts} attempt(s) at {isolation_level}: {source}"
)]
pub struct TransactionError {
	pub transaction_id: TransactionId,
	pub attempts: u32,
	pub isolation_level: IsolationLevel,
	#[source]
	pub source: Error,
}

impl TransactionError {
	pub fn new(
		transaction_id: TransactionId,
		attempts: u32,
		isolation_level: IsolationLevel,
		source: Error,
	) -> Self {
		Self {
			transaction_id,
			attempts,
			isolation_level,
			source,
		}
	}

	/// The error that triggered the final failed attempt.
	pub fn root_cause(&self) -> &Error {
		self.source.root_cause()
	}

	pub fn into_source(self) -> Error {
		self.source
	}
}
