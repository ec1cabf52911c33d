//! Recording connection pool shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tessera_tx::{
	Connection, ConnectionPool, DatabaseError, DatabaseType, IsolationLevel, QueryResult,
	QueryValue, Row,
};
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct MockState {
	/// Every statement seen by any connection, in order
	pub log: Vec<String>,
	pub acquired: usize,
	pub released: usize,
	pub discarded: usize,
	pub begun_at: Vec<Instant>,
	pub acquire_failures: VecDeque<DatabaseError>,
	pub commit_failures: VecDeque<DatabaseError>,
	pub rollback_failures: VecDeque<DatabaseError>,
	/// How long `ROLLBACK` waits before answering, like a session still busy
	/// with an earlier statement
	pub rollback_delay: Option<Duration>,
	/// Statements that always fail, keyed by exact SQL
	pub statement_failures: HashMap<String, DatabaseError>,
	/// Result sets handed out by `fetch_all`, front first
	pub results: VecDeque<Vec<Row>>,
}

#[derive(Clone)]
pub struct MockPool {
	state: Arc<Mutex<MockState>>,
	database_type: DatabaseType,
}

impl MockPool {
	pub fn new(database_type: DatabaseType) -> Self {
		Self {
			state: Arc::new(Mutex::new(MockState::default())),
			database_type,
		}
	}

	pub fn state(&self) -> MutexGuard<'_, MockState> {
		self.state.lock()
	}

	pub fn log(&self) -> Vec<String> {
		self.state.lock().log.clone()
	}

	pub fn count(&self, statement: &str) -> usize {
		self.state
			.lock()
			.log
			.iter()
			.filter(|entry| entry.as_str() == statement)
			.count()
	}

	pub fn fail_next_acquire(&self, error: DatabaseError) {
		self.state.lock().acquire_failures.push_back(error);
	}

	pub fn fail_next_commit(&self, error: DatabaseError) {
		self.state.lock().commit_failures.push_back(error);
	}

	pub fn fail_next_rollback(&self, error: DatabaseError) {
		self.state.lock().rollback_failures.push_back(error);
	}

	pub fn delay_rollback(&self, delay: Duration) {
		self.state.lock().rollback_delay = Some(delay);
	}

	pub fn fail_statement(&self, sql: &str, error: DatabaseError) {
		self.state
			.lock()
			.statement_failures
			.insert(sql.to_string(), error);
	}

	pub fn push_result(&self, rows: Vec<Row>) {
		self.state.lock().results.push_back(rows);
	}
}

#[async_trait]
impl ConnectionPool for MockPool {
	async fn acquire(&self) -> Result<Box<dyn Connection>, DatabaseError> {
		let mut state = self.state.lock();
		if let Some(error) = state.acquire_failures.pop_front() {
			return Err(error);
		}
		state.acquired += 1;
		Ok(Box::new(MockConnection {
			state: Arc::clone(&self.state),
			database_type: self.database_type,
		}))
	}
}

pub struct MockConnection {
	state: Arc<Mutex<MockState>>,
	database_type: DatabaseType,
}

impl MockConnection {
	fn record(&self, statement: impl Into<String>) {
		self.state.lock().log.push(statement.into());
	}
}

#[async_trait]
impl Connection for MockConnection {
	fn database_type(&self) -> DatabaseType {
		self.database_type
	}

	async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), DatabaseError> {
		self.record(format!("SET TRANSACTION ISOLATION LEVEL {}", level.to_sql()));
		Ok(())
	}

	async fn begin(&mut self) -> Result<(), DatabaseError> {
		let mut state = self.state.lock();
		state.log.push("BEGIN".to_string());
		state.begun_at.push(Instant::now());
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), DatabaseError> {
		let mut state = self.state.lock();
		state.log.push("COMMIT".to_string());
		match state.commit_failures.pop_front() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	async fn rollback(&mut self) -> Result<(), DatabaseError> {
		let delay = self.state.lock().rollback_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let mut state = self.state.lock();
		state.log.push("ROLLBACK".to_string());
		match state.rollback_failures.pop_front() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	async fn execute(
		&mut self,
		sql: &str,
		_params: &[QueryValue],
	) -> Result<QueryResult, DatabaseError> {
		let mut state = self.state.lock();
		state.log.push(sql.to_string());
		match state.statement_failures.get(sql) {
			Some(error) => Err(error.clone()),
			None => Ok(QueryResult { rows_affected: 1 }),
		}
	}

	async fn fetch_all(
		&mut self,
		sql: &str,
		_params: &[QueryValue],
	) -> Result<Vec<Row>, DatabaseError> {
		let mut state = self.state.lock();
		state.log.push(sql.to_string());
		if let Some(error) = state.statement_failures.get(sql) {
			return Err(error.clone());
		}
		Ok(state.results.pop_front().unwrap_or_default())
	}

	async fn release(self: Box<Self>) {
		self.state.lock().released += 1;
	}

	async fn discard(self: Box<Self>) {
		self.state.lock().discarded += 1;
	}
}

pub fn row(column: &str, value: QueryValue) -> Row {
	let mut row = Row::new();
	row.insert(column, value);
	row
}
