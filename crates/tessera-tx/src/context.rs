//! Transaction context handed to units of work
//!
//! A [`TransactionContext`] owns the connection of one transaction attempt.
//! Callbacks receive it as `&mut TransactionContext`, so it cannot outlive
//! the attempt and all statements on it run one after another.

use crate::connection::Connection;
use crate::error::{DatabaseError, Error, Result, SavepointError};
use crate::registry::TransactionId;
use crate::types::{DatabaseType, IsolationLevel, QueryResult, QueryValue, Row};
use std::time::Duration;

/// Interval between `pg_try_advisory_lock` polls
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Savepoint marker on a transaction's savepoint stack
///
/// Names are validated at construction: only ASCII alphanumeric characters
/// and underscores are allowed, and the name must not start with a digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
	name: String,
	depth: usize,
}

impl Savepoint {
	/// Create a new savepoint marker with name and depth
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::Savepoint;
	///
	/// let sp = Savepoint::new("my_savepoint", 1).unwrap();
	/// assert_eq!(sp.name(), "my_savepoint");
	/// assert_eq!(sp.depth(), 1);
	///
	/// assert!(Savepoint::new("1st", 1).is_err());
	/// assert!(Savepoint::new("sp; DROP TABLE claims", 1).is_err());
	/// ```
	pub fn new(name: impl Into<String>, depth: usize) -> Result<Self, SavepointError> {
		let name = name.into();
		validate_savepoint_name(&name)?;
		Ok(Self { name, depth })
	}

	/// Get the savepoint name
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Position on the stack, starting at 1
	pub fn depth(&self) -> usize {
		self.depth
	}

	/// Generate SQL for creating this savepoint
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::{DatabaseType, Savepoint};
	///
	/// let sp = Savepoint::new("checkpoint_1", 1).unwrap();
	/// assert_eq!(sp.to_sql(DatabaseType::Postgres), r#"SAVEPOINT "checkpoint_1""#);
	/// assert_eq!(sp.to_sql(DatabaseType::Mysql), "SAVEPOINT `checkpoint_1`");
	/// ```
	pub fn to_sql(&self, database_type: DatabaseType) -> String {
		format!("SAVEPOINT {}", database_type.quote_identifier(&self.name))
	}

	/// Generate SQL for releasing this savepoint
	pub fn release_sql(&self, database_type: DatabaseType) -> String {
		format!(
			"RELEASE SAVEPOINT {}",
			database_type.quote_identifier(&self.name)
		)
	}

	/// Generate SQL for rolling back to this savepoint
	pub fn rollback_sql(&self, database_type: DatabaseType) -> String {
		format!(
			"ROLLBACK TO SAVEPOINT {}",
			database_type.quote_identifier(&self.name)
		)
	}
}

fn validate_savepoint_name(name: &str) -> Result<(), SavepointError> {
	let valid = !name.is_empty()
		&& name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
		&& !name.starts_with(|c: char| c.is_ascii_digit());

	if valid {
		Ok(())
	} else {
		Err(SavepointError::InvalidName(name.to_string()))
	}
}

/// Ordered stack of savepoint markers with unique names
#[derive(Debug, Clone, Default)]
pub struct SavepointStack {
	markers: Vec<Savepoint>,
}

impl SavepointStack {
	pub fn new() -> Self {
		Self::default()
	}

	/// Check that `name` could be pushed
	pub fn check(&self, name: &str) -> Result<(), SavepointError> {
		validate_savepoint_name(name)?;
		if self.contains(name) {
			return Err(SavepointError::Duplicate(name.to_string()));
		}
		Ok(())
	}

	/// Push a new marker on top of the stack
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::{SavepointError, SavepointStack};
	///
	/// let mut stack = SavepointStack::new();
	/// stack.push("before_charges").unwrap();
	/// assert!(matches!(
	///     stack.push("before_charges"),
	///     Err(SavepointError::Duplicate(_))
	/// ));
	/// ```
	pub fn push(&mut self, name: &str) -> Result<&Savepoint, SavepointError> {
		self.check(name)?;
		let depth = self.markers.len() + 1;
		self.markers.push(Savepoint {
			name: name.to_string(),
			depth,
		});
		Ok(&self.markers[depth - 1])
	}

	pub fn peek(&self) -> Option<&Savepoint> {
		self.markers.last()
	}

	pub fn pop(&mut self) -> Option<Savepoint> {
		self.markers.pop()
	}

	pub fn get(&self, name: &str) -> Option<&Savepoint> {
		self.markers.iter().find(|sp| sp.name == name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	/// Drop every marker above `name`, keeping `name` itself
	///
	/// Returns the removed markers, bottom first.
	pub fn truncate_above(&mut self, name: &str) -> Result<Vec<Savepoint>, SavepointError> {
		let position = self.position(name)?;
		Ok(self.markers.split_off(position + 1))
	}

	/// Drop `name` and every marker above it
	///
	/// Returns the removed markers, bottom first.
	pub fn remove_from(&mut self, name: &str) -> Result<Vec<Savepoint>, SavepointError> {
		let position = self.position(name)?;
		Ok(self.markers.split_off(position))
	}

	/// Marker names, bottom first
	pub fn names(&self) -> Vec<&str> {
		self.markers.iter().map(|sp| sp.name.as_str()).collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Savepoint> {
		self.markers.iter()
	}

	pub fn len(&self) -> usize {
		self.markers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.markers.is_empty()
	}

	fn position(&self, name: &str) -> Result<usize, SavepointError> {
		self.markers
			.iter()
			.position(|sp| sp.name == name)
			.ok_or_else(|| SavepointError::NotFound(name.to_string()))
	}
}

/// Handle to one active transaction attempt
pub struct TransactionContext {
	transaction_id: TransactionId,
	isolation_level: IsolationLevel,
	attempt: u32,
	connection: Box<dyn Connection>,
	savepoints: SavepointStack,
	held_locks: Vec<String>,
}

impl TransactionContext {
	pub(crate) fn new(
		transaction_id: TransactionId,
		isolation_level: IsolationLevel,
		attempt: u32,
		connection: Box<dyn Connection>,
	) -> Self {
		Self {
			transaction_id,
			isolation_level,
			attempt,
			connection,
			savepoints: SavepointStack::new(),
			held_locks: Vec::new(),
		}
	}

	pub fn transaction_id(&self) -> &TransactionId {
		&self.transaction_id
	}

	pub fn isolation_level(&self) -> IsolationLevel {
		self.isolation_level
	}

	/// Attempt number, starting at 1
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn database_type(&self) -> DatabaseType {
		self.connection.database_type()
	}

	pub fn savepoints(&self) -> &SavepointStack {
		&self.savepoints
	}

	/// Names of the advisory locks currently held
	pub fn held_locks(&self) -> &[String] {
		&self.held_locks
	}

	/// Raw access to the owned connection
	///
	/// Committing or rolling back through this handle bypasses the executor
	/// and leaves the transaction in an undefined state.
	pub fn connection(&mut self) -> &mut dyn Connection {
		self.connection.as_mut()
	}

	/// Execute a statement and return the number of affected rows
	pub async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<QueryResult> {
		tracing::trace!(transaction_id = %self.transaction_id, sql, "Executing statement");
		Ok(self.connection.execute(sql, params).await?)
	}

	pub async fn fetch_all(&mut self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>> {
		tracing::trace!(transaction_id = %self.transaction_id, sql, "Fetching rows");
		Ok(self.connection.fetch_all(sql, params).await?)
	}

	/// Fetch the first row of a query, failing with `RowNotFound` when empty
	pub async fn fetch_one(&mut self, sql: &str, params: &[QueryValue]) -> Result<Row> {
		self.fetch_all(sql, params)
			.await?
			.into_iter()
			.next()
			.ok_or(Error::Database(DatabaseError::RowNotFound))
	}

	/// Create a savepoint and push it on the stack
	///
	/// Fails with [`SavepointError::Duplicate`] if the name is already on the
	/// stack, without issuing any statement.
	pub async fn create_savepoint(&mut self, name: &str) -> Result<()> {
		self.savepoints.check(name)?;

		let marker = Savepoint::new(name, self.savepoints.len() + 1)?;
		let sql = marker.to_sql(self.database_type());
		self.savepoint_statement(name, &sql).await?;

		self.savepoints.push(name)?;
		tracing::debug!(
			transaction_id = %self.transaction_id,
			savepoint = name,
			depth = marker.depth(),
			"Created savepoint"
		);
		Ok(())
	}

	/// Roll back to a savepoint
	///
	/// The marker stays on the stack; markers above it are discarded.
	pub async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
		let marker = self
			.savepoints
			.get(name)
			.cloned()
			.ok_or_else(|| SavepointError::NotFound(name.to_string()))?;

		let sql = marker.rollback_sql(self.database_type());
		self.savepoint_statement(name, &sql).await?;

		let discarded = self.savepoints.truncate_above(name)?;
		tracing::debug!(
			transaction_id = %self.transaction_id,
			savepoint = name,
			discarded = discarded.len(),
			"Rolled back to savepoint"
		);
		Ok(())
	}

	/// Release a savepoint
	///
	/// Removes the marker and every marker above it.
	pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
		let marker = self
			.savepoints
			.get(name)
			.cloned()
			.ok_or_else(|| SavepointError::NotFound(name.to_string()))?;

		let sql = marker.release_sql(self.database_type());
		self.savepoint_statement(name, &sql).await?;

		self.savepoints.remove_from(name)?;
		tracing::debug!(transaction_id = %self.transaction_id, savepoint = name, "Released savepoint");
		Ok(())
	}

	async fn savepoint_statement(&mut self, name: &str, sql: &str) -> Result<(), SavepointError> {
		self.connection
			.execute(sql, &[])
			.await
			.map(|_| ())
			.map_err(|source| SavepointError::Database {
				name: name.to_string(),
				source,
			})
	}

	/// Acquire a named advisory lock
	///
	/// Returns `Ok(false)` if the lock could not be obtained within `timeout`.
	/// Locks still held when the transaction ends are released before the
	/// connection goes back to the pool.
	pub async fn acquire_lock(&mut self, name: &str, timeout: Duration) -> Result<bool> {
		let acquired = match self.database_type() {
			DatabaseType::Mysql => {
				// GET_LOCK takes whole seconds
				let seconds = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
				let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
				let row = self
					.fetch_one(
						"SELECT GET_LOCK(?, ?) AS acquired",
						&[QueryValue::from(name), QueryValue::Int(seconds)],
					)
					.await?;
				row.value("acquired").is_some_and(QueryValue::as_flag)
			}
			DatabaseType::Postgres => self.poll_postgres_lock(name, timeout).await?,
			DatabaseType::Sqlite => {
				return Err(DatabaseError::Unsupported(
					"advisory locks are not available on SQLite".to_string(),
				)
				.into());
			}
		};

		if acquired {
			self.held_locks.push(name.to_string());
			tracing::debug!(transaction_id = %self.transaction_id, lock = name, "Acquired advisory lock");
		} else {
			tracing::debug!(
				transaction_id = %self.transaction_id,
				lock = name,
				?timeout,
				"Timed out waiting for advisory lock"
			);
		}
		Ok(acquired)
	}

	async fn poll_postgres_lock(&mut self, name: &str, timeout: Duration) -> Result<bool> {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let row = self
				.fetch_one(
					"SELECT pg_try_advisory_lock(hashtext($1)) AS acquired",
					&[QueryValue::from(name)],
				)
				.await?;
			if row.value("acquired").is_some_and(QueryValue::as_flag) {
				return Ok(true);
			}

			let now = tokio::time::Instant::now();
			if now >= deadline {
				return Ok(false);
			}
			tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
		}
	}

	/// Release a named advisory lock
	///
	/// Returns whether the server reported the lock as released.
	pub async fn release_lock(&mut self, name: &str) -> Result<bool> {
		let row = match self.database_type() {
			DatabaseType::Mysql => {
				self.fetch_one(
					"SELECT RELEASE_LOCK(?) AS released",
					&[QueryValue::from(name)],
				)
				.await?
			}
			DatabaseType::Postgres => {
				self.fetch_one(
					"SELECT pg_advisory_unlock(hashtext($1)) AS released",
					&[QueryValue::from(name)],
				)
				.await?
			}
			DatabaseType::Sqlite => {
				return Err(DatabaseError::Unsupported(
					"advisory locks are not available on SQLite".to_string(),
				)
				.into());
			}
		};

		if let Some(position) = self.held_locks.iter().position(|held| held == name) {
			self.held_locks.remove(position);
		}
		Ok(row.value("released").is_some_and(QueryValue::as_flag))
	}

	/// Best-effort release of every lock still held
	pub(crate) async fn release_held_locks(&mut self) {
		while let Some(name) = self.held_locks.last().cloned() {
			if let Err(error) = self.release_lock(&name).await {
				tracing::warn!(
					transaction_id = %self.transaction_id,
					lock = %name,
					%error,
					"Failed to release advisory lock"
				);
				self.held_locks.retain(|held| held != &name);
			}
		}
	}

	pub(crate) fn into_connection(self) -> Box<dyn Connection> {
		self.connection
	}
}

impl std::fmt::Debug for TransactionContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransactionContext")
			.field("transaction_id", &self.transaction_id)
			.field("isolation_level", &self.isolation_level)
			.field("attempt", &self.attempt)
			.field("database_type", &self.connection.database_type())
			.field("savepoints", &self.savepoints.names())
			.field("held_locks", &self.held_locks)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use rstest::*;
	use std::collections::VecDeque;
	use std::sync::Arc;

	/// Connection that records statements and answers queries from a script
	struct ScriptedConnection {
		database_type: DatabaseType,
		log: Arc<Mutex<Vec<String>>>,
		answers: VecDeque<Vec<Row>>,
		fail_on: Option<String>,
	}

	#[async_trait]
	impl Connection for ScriptedConnection {
		fn database_type(&self) -> DatabaseType {
			self.database_type
		}

		async fn set_isolation_level(&mut self, _level: IsolationLevel) -> Result<(), DatabaseError> {
			Ok(())
		}

		async fn begin(&mut self) -> Result<(), DatabaseError> {
			Ok(())
		}

		async fn commit(&mut self) -> Result<(), DatabaseError> {
			Ok(())
		}

		async fn rollback(&mut self) -> Result<(), DatabaseError> {
			Ok(())
		}

		async fn execute(
			&mut self,
			sql: &str,
			_params: &[QueryValue],
		) -> Result<QueryResult, DatabaseError> {
			self.log.lock().push(sql.to_string());
			if self.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
				return Err(DatabaseError::Deadlock("scripted".into()));
			}
			Ok(QueryResult::default())
		}

		async fn fetch_all(
			&mut self,
			sql: &str,
			_params: &[QueryValue],
		) -> Result<Vec<Row>, DatabaseError> {
			self.log.lock().push(sql.to_string());
			Ok(self.answers.pop_front().unwrap_or_default())
		}

		async fn release(self: Box<Self>) {}

		async fn discard(self: Box<Self>) {}
	}

	fn flag_row(column: &str, value: QueryValue) -> Vec<Row> {
		let mut row = Row::new();
		row.insert(column, value);
		vec![row]
	}

	fn context_with(
		database_type: DatabaseType,
		answers: Vec<Vec<Row>>,
		fail_on: Option<&str>,
	) -> (TransactionContext, Arc<Mutex<Vec<String>>>) {
		let log = Arc::new(Mutex::new(Vec::new()));
		let connection = ScriptedConnection {
			database_type,
			log: log.clone(),
			answers: answers.into(),
			fail_on: fail_on.map(str::to_string),
		};
		let ctx = TransactionContext::new(
			TransactionId::from("tx-ctx"),
			IsolationLevel::ReadCommitted,
			1,
			Box::new(connection),
		);
		(ctx, log)
	}

	#[fixture]
	fn postgres() -> (TransactionContext, Arc<Mutex<Vec<String>>>) {
		context_with(DatabaseType::Postgres, Vec::new(), None)
	}

	#[rstest]
	#[case("")]
	#[case("9lives")]
	#[case("with space")]
	#[case("quote\"d")]
	#[case("caf\u{e9}")]
	fn test_invalid_savepoint_names(#[case] name: &str) {
		assert!(matches!(
			Savepoint::new(name, 1),
			Err(SavepointError::InvalidName(_))
		));
	}

	#[rstest]
	fn test_stack_push_peek_pop() {
		let mut stack = SavepointStack::new();
		stack.push("a").unwrap();
		stack.push("b").unwrap();

		assert_eq!(stack.peek().map(Savepoint::name), Some("b"));
		assert_eq!(stack.peek().map(Savepoint::depth), Some(2));
		assert_eq!(stack.pop().map(|sp| sp.name), Some("b".to_string()));
		assert_eq!(stack.names(), vec!["a"]);
	}

	#[rstest]
	fn test_stack_truncate_and_remove() {
		let mut stack = SavepointStack::new();
		for name in ["a", "b", "c", "d"] {
			stack.push(name).unwrap();
		}

		let removed = stack.truncate_above("b").unwrap();
		assert_eq!(removed.len(), 2);
		assert_eq!(stack.names(), vec!["a", "b"]);

		stack.remove_from("b").unwrap();
		assert_eq!(stack.names(), vec!["a"]);

		assert!(matches!(
			stack.truncate_above("zz"),
			Err(SavepointError::NotFound(_))
		));
	}

	#[rstest]
	#[tokio::test]
	async fn test_create_savepoint_issues_sql(
		postgres: (TransactionContext, Arc<Mutex<Vec<String>>>),
	) {
		let (mut ctx, log) = postgres;
		ctx.create_savepoint("before_charges").await.unwrap();

		assert_eq!(log.lock().as_slice(), [r#"SAVEPOINT "before_charges""#]);
		assert_eq!(ctx.savepoints().names(), vec!["before_charges"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_duplicate_savepoint_rejected_without_sql(
		postgres: (TransactionContext, Arc<Mutex<Vec<String>>>),
	) {
		let (mut ctx, log) = postgres;
		ctx.create_savepoint("sp").await.unwrap();

		let result = ctx.create_savepoint("sp").await;
		assert!(matches!(
			result,
			Err(Error::Savepoint(SavepointError::Duplicate(_)))
		));
		assert_eq!(log.lock().len(), 1);
		assert_eq!(ctx.savepoints().len(), 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_rollback_to_truncates_above(
		postgres: (TransactionContext, Arc<Mutex<Vec<String>>>),
	) {
		let (mut ctx, log) = postgres;
		for name in ["outer", "middle", "inner"] {
			ctx.create_savepoint(name).await.unwrap();
		}

		ctx.rollback_to_savepoint("middle").await.unwrap();

		assert_eq!(ctx.savepoints().names(), vec!["outer", "middle"]);
		assert_eq!(
			log.lock().last().map(String::as_str),
			Some(r#"ROLLBACK TO SAVEPOINT "middle""#)
		);

		// A name freed by truncation can be reused
		ctx.create_savepoint("inner").await.unwrap();
		assert_eq!(ctx.savepoints().names(), vec!["outer", "middle", "inner"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_release_removes_marker_and_above(
		postgres: (TransactionContext, Arc<Mutex<Vec<String>>>),
	) {
		let (mut ctx, _log) = postgres;
		for name in ["a", "b", "c"] {
			ctx.create_savepoint(name).await.unwrap();
		}

		ctx.release_savepoint("b").await.unwrap();
		assert_eq!(ctx.savepoints().names(), vec!["a"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_unknown_savepoint_not_found(
		postgres: (TransactionContext, Arc<Mutex<Vec<String>>>),
	) {
		let (mut ctx, log) = postgres;
		let result = ctx.rollback_to_savepoint("missing").await;
		assert!(matches!(
			result,
			Err(Error::Savepoint(SavepointError::NotFound(_)))
		));
		assert!(log.lock().is_empty());
	}

	#[tokio::test]
	async fn test_failed_savepoint_statement_keeps_stack() {
		let (mut ctx, _log) = context_with(DatabaseType::Mysql, Vec::new(), Some("SAVEPOINT"));
		let result = ctx.create_savepoint("sp").await;

		assert!(matches!(
			result,
			Err(Error::Savepoint(SavepointError::Database { .. }))
		));
		assert!(ctx.savepoints().is_empty());
	}

	#[tokio::test]
	async fn test_mysql_lock_roundtrip() {
		let (mut ctx, log) = context_with(
			DatabaseType::Mysql,
			vec![
				flag_row("acquired", QueryValue::Int(1)),
				flag_row("released", QueryValue::Int(1)),
			],
			None,
		);

		assert!(ctx.acquire_lock("claim_42", Duration::from_millis(1500)).await.unwrap());
		assert_eq!(ctx.held_locks(), ["claim_42".to_string()]);

		assert!(ctx.release_lock("claim_42").await.unwrap());
		assert!(ctx.held_locks().is_empty());
		assert_eq!(
			log.lock().as_slice(),
			[
				"SELECT GET_LOCK(?, ?) AS acquired",
				"SELECT RELEASE_LOCK(?) AS released"
			]
		);
	}

	#[tokio::test]
	async fn test_mysql_lock_timeout_returns_false() {
		let (mut ctx, _log) = context_with(
			DatabaseType::Mysql,
			vec![flag_row("acquired", QueryValue::Int(0))],
			None,
		);
		assert!(!ctx.acquire_lock("busy", Duration::from_secs(1)).await.unwrap());
		assert!(ctx.held_locks().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_postgres_lock_polls_until_deadline() {
		let answers = (0..10)
			.map(|_| flag_row("acquired", QueryValue::Bool(false)))
			.collect();
		let (mut ctx, log) = context_with(DatabaseType::Postgres, answers, None);

		let acquired = ctx
			.acquire_lock("busy", Duration::from_millis(250))
			.await
			.unwrap();

		assert!(!acquired);
		// Polls at 0ms, 100ms, 200ms and 250ms
		assert_eq!(log.lock().len(), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_postgres_lock_acquired_after_retry() {
		let (mut ctx, _log) = context_with(
			DatabaseType::Postgres,
			vec![
				flag_row("acquired", QueryValue::Bool(false)),
				flag_row("acquired", QueryValue::Bool(true)),
			],
			None,
		);
		assert!(ctx.acquire_lock("claim", Duration::from_secs(5)).await.unwrap());
		assert_eq!(ctx.held_locks().len(), 1);
	}

	#[tokio::test]
	async fn test_sqlite_locks_unsupported() {
		let (mut ctx, _log) = context_with(DatabaseType::Sqlite, Vec::new(), None);
		let result = ctx.acquire_lock("any", Duration::from_secs(1)).await;
		assert!(matches!(
			result,
			Err(Error::Database(DatabaseError::Unsupported(_)))
		));
	}

	#[tokio::test]
	async fn test_release_held_locks_clears_all() {
		let (mut ctx, log) = context_with(
			DatabaseType::Mysql,
			vec![
				flag_row("acquired", QueryValue::Int(1)),
				flag_row("acquired", QueryValue::Int(1)),
			],
			None,
		);
		ctx.acquire_lock("a", Duration::from_secs(1)).await.unwrap();
		ctx.acquire_lock("b", Duration::from_secs(1)).await.unwrap();

		ctx.release_held_locks().await;

		assert!(ctx.held_locks().is_empty());
		assert_eq!(
			log.lock()
				.iter()
				.filter(|sql| sql.contains("RELEASE_LOCK"))
				.count(),
			2
		);
	}

	#[tokio::test]
	async fn test_fetch_one_on_empty_result() {
		let (mut ctx, _log) = context_with(DatabaseType::Postgres, Vec::new(), None);
		let result = ctx.fetch_one("SELECT 1 WHERE FALSE", &[]).await;
		assert!(matches!(
			result,
			Err(Error::Database(DatabaseError::RowNotFound))
		));
	}
}
