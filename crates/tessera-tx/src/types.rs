//! Common value types shared by connections, contexts and drivers

use crate::error::DatabaseError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
	Postgres,
	Mysql,
	Sqlite,
}

impl DatabaseType {
	/// Quote an identifier using the dialect's quoting rules
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::DatabaseType;
	///
	/// assert_eq!(DatabaseType::Postgres.quote_identifier("sp_1"), r#""sp_1""#);
	/// assert_eq!(DatabaseType::Mysql.quote_identifier("sp_1"), "`sp_1`");
	/// ```
	pub fn quote_identifier(&self, ident: &str) -> String {
		match self {
			DatabaseType::Mysql => format!("`{}`", ident.replace('`', "``")),
			DatabaseType::Postgres | DatabaseType::Sqlite => {
				format!("\"{}\"", ident.replace('"', "\"\""))
			}
		}
	}
}

impl fmt::Display for DatabaseType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			DatabaseType::Postgres => "postgres",
			DatabaseType::Mysql => "mysql",
			DatabaseType::Sqlite => "sqlite",
		};
		f.write_str(name)
	}
}

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
	ReadUncommitted,
	#[default]
	ReadCommitted,
	RepeatableRead,
	Serializable,
}

impl IsolationLevel {
	/// Convert isolation level to SQL string
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::IsolationLevel;
	///
	/// assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
	/// assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
	/// ```
	pub fn to_sql(&self) -> &'static str {
		match self {
			IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
			IsolationLevel::ReadCommitted => "READ COMMITTED",
			IsolationLevel::RepeatableRead => "REPEATABLE READ",
			IsolationLevel::Serializable => "SERIALIZABLE",
		}
	}
}

impl fmt::Display for IsolationLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.to_sql())
	}
}

/// Query value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(chrono::DateTime<chrono::Utc>),
}

impl QueryValue {
	/// Interpret the value as a boolean flag.
	///
	/// Lock functions report success as `1` on MySQL and `true` on PostgreSQL.
	pub fn as_flag(&self) -> bool {
		matches!(self, QueryValue::Bool(true) | QueryValue::Int(1))
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Float(f)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<Vec<u8>> for QueryValue {
	fn from(b: Vec<u8>) -> Self {
		QueryValue::Bytes(b)
	}
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
	fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(QueryValue::Null, Into::into)
	}
}

/// Query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryResult {
	pub rows_affected: u64,
}

/// Row from query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
	data: HashMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: QueryValue) {
		self.data.insert(key.into(), value);
	}

	/// Borrow the raw value of a column
	pub fn value(&self, key: &str) -> Option<&QueryValue> {
		self.data.get(key)
	}

	/// Decode a column into a Rust value
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::{QueryValue, Row};
	///
	/// let mut row = Row::new();
	/// row.insert("balance", QueryValue::Int(1250));
	/// let balance: i64 = row.get("balance").unwrap();
	/// assert_eq!(balance, 1250);
	/// ```
	pub fn get<T>(&self, key: &str) -> Result<T, DatabaseError>
	where
		T: TryFrom<QueryValue, Error = DatabaseError>,
	{
		self.data
			.get(key)
			.cloned()
			.ok_or_else(|| DatabaseError::ColumnNotFound(key.to_string()))
			.and_then(T::try_from)
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

// Type conversions for QueryValue
impl TryFrom<QueryValue> for i64 {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => Ok(i),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to i64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for String {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::String(s) => Ok(s),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to String",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for bool {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Bool(b) => Ok(b),
			QueryValue::Int(0) => Ok(false),
			QueryValue::Int(1) => Ok(true),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to bool",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for f64 {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Float(f) => Ok(f),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to f64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for chrono::DateTime<chrono::Utc> {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Timestamp(dt) => Ok(dt),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to DateTime<Utc>",
				value
			))),
		}
	}
}
