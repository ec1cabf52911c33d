//! Batch execution tests

mod common;

use common::{MockPool, row};
use rstest::*;
use tessera_tx::{
	BatchOperation, BatchOptions, DatabaseError, DatabaseType, Error, OperationOutput,
	QueryResult, QueryValue, SavepointError, TransactionExecutor, TransactionOptions,
};

const FIRST: &str = "INSERT INTO claims (id) VALUES (1)";
const SECOND: &str = "INSERT INTO claims (id) VALUES (2)";
const THIRD: &str = "INSERT INTO claims (id) VALUES (3)";

#[fixture]
fn pool() -> MockPool {
	let pool = MockPool::new(DatabaseType::Postgres);
	pool.fail_statement(
		SECOND,
		DatabaseError::from_code(Some("23505"), "duplicate key value"),
	);
	pool
}

fn claims() -> Vec<BatchOperation<()>> {
	vec![
		BatchOperation::statement(FIRST, vec![]),
		BatchOperation::statement(SECOND, vec![]),
		BatchOperation::statement(THIRD, vec![]),
	]
}

fn single_attempt() -> TransactionOptions {
	TransactionOptions::new().with_retry_attempts(1)
}

#[rstest]
#[tokio::test]
async fn test_continue_on_error_with_savepoints(pool: MockPool) {
	let executor = TransactionExecutor::new(pool.clone());
	let options = BatchOptions::new()
		.with_continue_on_error(true)
		.with_savepoints(true)
		.with_transaction(single_attempt());

	let outcomes = executor.execute_batch(claims(), &options).await.unwrap();

	assert_eq!(outcomes.len(), 3);
	assert_eq!(
		outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
		vec![0, 1, 2]
	);
	assert!(outcomes[0].is_success());
	assert!(matches!(
		outcomes[1].error(),
		Some(Error::Database(DatabaseError::Query { .. }))
	));
	assert_eq!(
		outcomes[2].result.as_ref().ok(),
		Some(&OperationOutput::Statement(QueryResult { rows_affected: 1 }))
	);

	assert_eq!(
		pool.log()[2..],
		[
			r#"SAVEPOINT "op_0""#,
			FIRST,
			r#"RELEASE SAVEPOINT "op_0""#,
			r#"SAVEPOINT "op_1""#,
			SECOND,
			r#"ROLLBACK TO SAVEPOINT "op_1""#,
			r#"RELEASE SAVEPOINT "op_1""#,
			r#"SAVEPOINT "op_2""#,
			THIRD,
			r#"RELEASE SAVEPOINT "op_2""#,
			"COMMIT",
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_continue_on_error_without_savepoints(pool: MockPool) {
	let executor = TransactionExecutor::new(pool.clone());
	let options = BatchOptions::new()
		.with_continue_on_error(true)
		.with_transaction(single_attempt());

	let outcomes = executor.execute_batch(claims(), &options).await.unwrap();

	let successes: Vec<bool> = outcomes.iter().map(|o| o.is_success()).collect();
	assert_eq!(successes, vec![true, false, true]);
	assert_eq!(pool.log()[2..], [FIRST, SECOND, THIRD, "COMMIT"]);
}

#[rstest]
#[tokio::test]
async fn test_first_failure_aborts_batch(pool: MockPool) {
	let executor = TransactionExecutor::new(pool.clone());
	let options = BatchOptions::new()
		.with_savepoints(true)
		.with_transaction(single_attempt());

	let err = executor.execute_batch(claims(), &options).await.unwrap_err();

	assert!(matches!(
		err.root_cause(),
		Error::Database(DatabaseError::Query { .. })
	));
	let log = pool.log();
	assert_eq!(pool.count(THIRD), 0);
	assert_eq!(pool.count("COMMIT"), 0);
	assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
}

#[rstest]
#[tokio::test]
async fn test_failed_savepoint_rollback_aborts_batch(pool: MockPool) {
	pool.fail_statement(
		r#"ROLLBACK TO SAVEPOINT "op_1""#,
		DatabaseError::from_code(Some("3B001"), "savepoint does not exist"),
	);
	let executor = TransactionExecutor::new(pool.clone());
	let options = BatchOptions::new()
		.with_continue_on_error(true)
		.with_savepoints(true)
		.with_transaction(single_attempt());

	let err = executor.execute_batch(claims(), &options).await.unwrap_err();

	match err.root_cause() {
		Error::Savepoint(SavepointError::Database { name, .. }) => assert_eq!(name, "op_1"),
		other => panic!("expected savepoint error, got {:?}", other),
	}
	assert_eq!(pool.count(THIRD), 0);
	assert_eq!(pool.count("ROLLBACK"), 1);
}

#[tokio::test]
async fn test_callback_operations_share_the_transaction() {
	let pool = MockPool::new(DatabaseType::Sqlite);
	pool.push_result(vec![
		row("id", QueryValue::Int(1)),
		row("id", QueryValue::Int(2)),
	]);
	let executor = TransactionExecutor::new(pool.clone());

	let operations = vec![
		BatchOperation::callback(|tx| {
			Box::pin(async move {
				tx.execute("DELETE FROM holds WHERE expired", &[]).await?;
				Ok::<_, Error>(0)
			})
		}),
		BatchOperation::callback(|tx| {
			Box::pin(async move {
				let rows = tx.fetch_all("SELECT id FROM holds", &[]).await?;
				Ok::<_, Error>(rows.len())
			})
		}),
	];

	let outcomes = executor
		.execute_batch(operations, &BatchOptions::new())
		.await
		.unwrap();

	let values: Vec<_> = outcomes
		.into_iter()
		.map(|outcome| outcome.result.unwrap())
		.collect();
	assert_eq!(
		values,
		vec![OperationOutput::Value(0), OperationOutput::Value(2)]
	);
	assert_eq!(pool.count("BEGIN"), 1);
	assert_eq!(pool.count("COMMIT"), 1);
}

#[tokio::test]
async fn test_empty_batch_commits() {
	let pool = MockPool::new(DatabaseType::Mysql);
	let executor = TransactionExecutor::new(pool.clone());

	let outcomes = executor
		.execute_batch(Vec::<BatchOperation<()>>::new(), &BatchOptions::new())
		.await
		.unwrap();

	assert!(outcomes.is_empty());
	assert_eq!(pool.count("COMMIT"), 1);
}
