//! End-to-end tests against an on-disk SQLite database

#![cfg(feature = "sqlite")]

use rstest::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::time::Duration;
use tempfile::TempDir;
use tessera_tx::drivers::sqlite::SqlitePool;
use tessera_tx::{
	BatchOperation, BatchOptions, DatabaseError, Error, PoolConfig, QueryValue,
	TransactionExecutor, TransactionOptions,
};

struct Database {
	executor: TransactionExecutor,
	// Keeps the database file alive for the duration of the test
	_dir: TempDir,
}

#[fixture]
async fn database() -> Database {
	let dir = tempfile::tempdir().unwrap();
	let url = format!("sqlite://{}?mode=rwc", dir.path().join("tessera.db").display());
	let pool = SqlitePool::connect(&url, &PoolConfig::new().with_max_connections(1))
		.await
		.unwrap();
	let executor = TransactionExecutor::new(pool);

	executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.execute(
						"CREATE TABLE claims (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, \
						 weight REAL, payload BLOB, settled BOOLEAN NOT NULL DEFAULT 0)",
						&[],
					)
					.await?;
					Ok::<_, Error>(())
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap();

	Database {
		executor,
		_dir: dir,
	}
}

async fn count(executor: &TransactionExecutor) -> i64 {
	executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					let row = tx.fetch_one("SELECT COUNT(*) AS n FROM claims", &[]).await?;
					Ok::<_, Error>(row.get::<i64>("n")?)
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap()
}

fn insert(id: i64) -> BatchOperation<()> {
	BatchOperation::statement(
		"INSERT INTO claims (id, owner) VALUES (?, ?)",
		vec![QueryValue::Int(id), QueryValue::from("ops")],
	)
}

#[rstest]
#[tokio::test]
async fn test_commit_persists_rows(#[future] database: Database) {
	let db = database.await;

	let affected = db
		.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					let result = tx
						.execute(
							"INSERT INTO claims (id, owner) VALUES (?, ?)",
							&[QueryValue::Int(1), QueryValue::from("alice")],
						)
						.await?;
					Ok::<_, Error>(result.rows_affected)
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap();

	assert_eq!(affected, 1);
	assert_eq!(count(&db.executor).await, 1);
}

#[rstest]
#[tokio::test]
async fn test_failed_callback_discards_writes(#[future] database: Database) {
	let db = database.await;

	let err = db
		.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.execute(
						"INSERT INTO claims (id, owner) VALUES (?, ?)",
						&[QueryValue::Int(1), QueryValue::from("alice")],
					)
					.await?;
					Err::<(), _>(Error::Other(anyhow::anyhow!("validation failed")))
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap_err();

	assert_eq!(err.attempts, 1);
	assert_eq!(count(&db.executor).await, 0);
}

#[rstest]
#[tokio::test]
async fn test_rollback_to_savepoint_keeps_earlier_work(#[future] database: Database) {
	let db = database.await;

	db.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.execute(
						"INSERT INTO claims (id, owner) VALUES (?, ?)",
						&[QueryValue::Int(1), QueryValue::from("alice")],
					)
					.await?;
					tx.create_savepoint("second_claim").await?;
					tx.execute(
						"INSERT INTO claims (id, owner) VALUES (?, ?)",
						&[QueryValue::Int(2), QueryValue::from("bob")],
					)
					.await?;
					tx.rollback_to_savepoint("second_claim").await?;
					tx.release_savepoint("second_claim").await?;
					Ok::<_, Error>(())
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap();

	assert_eq!(count(&db.executor).await, 1);
}

#[rstest]
#[tokio::test]
async fn test_batch_skips_constraint_violation(#[future] database: Database) {
	let db = database.await;
	let options = BatchOptions::new()
		.with_continue_on_error(true)
		.with_savepoints(true);

	let outcomes = db
		.executor
		.execute_batch(vec![insert(1), insert(1), insert(2)], &options)
		.await
		.unwrap();

	let successes: Vec<bool> = outcomes.iter().map(|o| o.is_success()).collect();
	assert_eq!(successes, vec![true, false, true]);
	assert!(matches!(
		outcomes[1].error(),
		Some(Error::Database(DatabaseError::Query { .. }))
	));
	assert_eq!(count(&db.executor).await, 2);
}

#[rstest]
#[tokio::test]
async fn test_row_values_are_converted(#[future] database: Database) {
	let db = database.await;

	let rows = db
		.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.execute(
						"INSERT INTO claims (id, owner, weight, payload, settled) \
						 VALUES (?, ?, ?, ?, ?)",
						&[
							QueryValue::Int(7),
							QueryValue::from("carol"),
							QueryValue::Float(2.5),
							QueryValue::Bytes(vec![0xde, 0xad]),
							QueryValue::Bool(true),
						],
					)
					.await?;
					tx.execute(
						"INSERT INTO claims (id, owner) VALUES (?, ?)",
						&[QueryValue::Int(8), QueryValue::from("dave")],
					)
					.await?;
					tx.fetch_all(
						"SELECT id, owner, weight, payload, settled FROM claims ORDER BY id",
						&[],
					)
					.await
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap();

	assert_eq!(rows.len(), 2);
	assert_eq!(rows[0].value("id"), Some(&QueryValue::Int(7)));
	assert_eq!(rows[0].value("owner"), Some(&QueryValue::String("carol".to_string())));
	assert_eq!(rows[0].value("weight"), Some(&QueryValue::Float(2.5)));
	assert_eq!(rows[0].value("payload"), Some(&QueryValue::Bytes(vec![0xde, 0xad])));
	assert_eq!(rows[0].value("settled"), Some(&QueryValue::Bool(true)));
	assert_eq!(rows[1].value("weight"), Some(&QueryValue::Null));
	assert_eq!(rows[1].value("settled"), Some(&QueryValue::Bool(false)));
}

#[rstest]
#[tokio::test]
async fn test_advisory_locks_unsupported(#[future] database: Database) {
	let db = database.await;

	let err = db
		.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.acquire_lock("settlement", Duration::from_secs(1))
						.await
				})
			},
			&TransactionOptions::new(),
		)
		.await
		.unwrap_err();

	assert!(matches!(
		err.root_cause(),
		Error::Database(DatabaseError::Unsupported(_))
	));
	assert_eq!(count(&db.executor).await, 0);
}

#[tokio::test]
async fn test_locked_database_is_retried_as_transient() {
	let dir = tempfile::tempdir().unwrap();
	let options = SqliteConnectOptions::new()
		.filename(dir.path().join("locked.db"))
		.create_if_missing(true)
		.busy_timeout(Duration::ZERO);
	let raw = SqlitePoolOptions::new()
		.max_connections(2)
		.connect_with(options)
		.await
		.unwrap();
	sqlx::query("CREATE TABLE claims (id INTEGER PRIMARY KEY)")
		.execute(&raw)
		.await
		.unwrap();

	let mut holder = raw.acquire().await.unwrap();
	sqlx::query("BEGIN EXCLUSIVE")
		.execute(&mut *holder)
		.await
		.unwrap();

	let direct = sqlx::query("INSERT INTO claims (id) VALUES (1)")
		.execute(&raw)
		.await
		.unwrap_err();
	let direct = DatabaseError::from(direct);
	assert!(
		matches!(direct, DatabaseError::LockWaitTimeout(_)),
		"unexpected classification: {:?}",
		direct
	);

	let executor = TransactionExecutor::new(SqlitePool::new(raw.clone()));
	let err = executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.execute("INSERT INTO claims (id) VALUES (1)", &[]).await?;
					Ok::<_, Error>(())
				})
			},
			&TransactionOptions::new()
				.with_retry_attempts(2)
				.with_retry_delay(Duration::from_millis(10)),
		)
		.await
		.unwrap_err();

	assert_eq!(err.attempts, 2);
	assert!(matches!(
		err.root_cause(),
		Error::Database(DatabaseError::LockWaitTimeout(_))
	));

	sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_timeout_returns_while_statement_still_runs(#[future] database: Database) {
	let db = database.await;
	let started = std::time::Instant::now();

	let err = db
		.executor
		.execute_transaction(
			|tx| {
				Box::pin(async move {
					tx.fetch_one(
						"WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n \
						 WHERE x < 30000000) SELECT COUNT(*) AS total FROM n",
						&[],
					)
					.await
				})
			},
			&TransactionOptions::new()
				.with_timeout(Duration::from_millis(100))
				.with_retry_attempts(1),
		)
		.await
		.unwrap_err();

	assert!(matches!(err.root_cause(), Error::Timeout { .. }));
	assert!(
		started.elapsed() < Duration::from_secs(2),
		"returned after {:?}",
		started.elapsed()
	);
	assert!(db.executor.registry().is_empty());
}
