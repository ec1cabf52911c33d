//! Transaction registry
//!
//! Tracks every in-flight transaction and its status. The registry is an
//! injected value rather than process-wide state: clones share the same
//! underlying map, so an executor and an observer can hold the same registry
//! while independent executors (and tests) stay isolated.

use crate::error::{Error, Result};
use crate::types::{DatabaseType, IsolationLevel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Unique identifier of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
	/// Generate a new random identifier
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::TransactionId;
	///
	/// let a = TransactionId::new();
	/// let b = TransactionId::new();
	/// assert_ne!(a, b);
	/// ```
	pub fn new() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for TransactionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for TransactionId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for TransactionId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

/// Transaction status
///
/// Transitions are monotonic: `Pending -> Active -> {Committed | RolledBack | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	Pending,
	Active,
	Committed,
	RolledBack,
	Failed,
}

impl TransactionStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Failed
		)
	}

	/// Whether moving from `self` to `next` respects the state machine
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::TransactionStatus;
	///
	/// assert!(TransactionStatus::Active.can_transition_to(TransactionStatus::Committed));
	/// assert!(!TransactionStatus::Committed.can_transition_to(TransactionStatus::Active));
	/// ```
	pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
		use TransactionStatus::*;

		match (self, next) {
			(Pending, Active) => true,
			(Pending | Active, Committed | RolledBack | Failed) => true,
			_ => false,
		}
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			TransactionStatus::Pending => "PENDING",
			TransactionStatus::Active => "ACTIVE",
			TransactionStatus::Committed => "COMMITTED",
			TransactionStatus::RolledBack => "ROLLED_BACK",
			TransactionStatus::Failed => "FAILED",
		};
		f.write_str(name)
	}
}

/// Metadata kept for one in-flight transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
	pub id: TransactionId,
	pub status: TransactionStatus,
	pub isolation_level: IsolationLevel,
	/// Attempt number this record belongs to (1-based)
	pub attempt: u32,
	/// Backend of the connection owned by the transaction
	pub database_type: DatabaseType,
	pub started_at: DateTime<Utc>,
	pub ended_at: Option<DateTime<Utc>>,
	pub metadata: HashMap<String, String>,
}

impl TransactionRecord {
	/// Create a record in `Pending` state
	pub fn new(
		id: TransactionId,
		isolation_level: IsolationLevel,
		attempt: u32,
		database_type: DatabaseType,
	) -> Self {
		Self {
			id,
			status: TransactionStatus::Pending,
			isolation_level,
			attempt,
			database_type,
			started_at: Utc::now(),
			ended_at: None,
			metadata: HashMap::new(),
		}
	}

	/// Mark the record as `Active`
	pub fn activate(mut self) -> Self {
		self.status = TransactionStatus::Active;
		self
	}

	/// Add metadata
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// Registry of in-flight transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
	entries: Arc<DashMap<TransactionId, TransactionRecord>>,
}

impl TransactionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a transaction, replacing any previous record with the same id
	pub fn track_transaction(&self, record: TransactionRecord) {
		tracing::debug!(
			transaction_id = %record.id,
			status = %record.status,
			attempt = record.attempt,
			"Tracking transaction"
		);
		self.entries.insert(record.id.clone(), record);
	}

	/// Snapshot of a registered transaction
	pub fn get_transaction(&self, id: &TransactionId) -> Option<TransactionRecord> {
		self.entries.get(id).map(|entry| entry.value().clone())
	}

	/// Move a transaction to a new status
	///
	/// Sets the end time when the new status is terminal.
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::{
	///     DatabaseType, IsolationLevel, TransactionId, TransactionRecord, TransactionRegistry,
	///     TransactionStatus,
	/// };
	///
	/// let registry = TransactionRegistry::new();
	/// let id = TransactionId::new();
	/// let record = TransactionRecord::new(id.clone(), IsolationLevel::ReadCommitted, 1, DatabaseType::Postgres);
	/// registry.track_transaction(record.activate());
	///
	/// registry.update_status(&id, TransactionStatus::Committed).unwrap();
	/// let record = registry.get_transaction(&id).unwrap();
	/// assert_eq!(record.status, TransactionStatus::Committed);
	/// assert!(record.ended_at.is_some());
	///
	/// // Terminal states are final
	/// assert!(registry.update_status(&id, TransactionStatus::Active).is_err());
	/// ```
	pub fn update_status(&self, id: &TransactionId, status: TransactionStatus) -> Result<()> {
		let mut entry = self
			.entries
			.get_mut(id)
			.ok_or_else(|| Error::TransactionNotFound(id.clone()))?;

		if !entry.status.can_transition_to(status) {
			return Err(Error::InvalidStatusTransition {
				transaction_id: id.clone(),
				from: entry.status,
				to: status,
			});
		}

		entry.status = status;
		if status.is_terminal() {
			entry.ended_at = Some(Utc::now());
		}
		Ok(())
	}

	/// Remove a transaction unconditionally
	pub fn cleanup_transaction(&self, id: &TransactionId) -> Option<TransactionRecord> {
		self.entries.remove(id).map(|(_, record)| record)
	}

	/// Snapshot of all transactions currently in `Active` state
	pub fn active_transactions(&self) -> Vec<TransactionRecord> {
		self.entries
			.iter()
			.filter(|entry| entry.status == TransactionStatus::Active)
			.map(|entry| entry.value().clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Removes a registry entry when dropped.
///
/// Guarantees cleanup even when the future driving a transaction is dropped
/// before reaching its own cleanup step.
pub(crate) struct RegistryEntryGuard {
	registry: TransactionRegistry,
	id: TransactionId,
}

impl RegistryEntryGuard {
	pub(crate) fn new(registry: TransactionRegistry, id: TransactionId) -> Self {
		Self { registry, id }
	}
}

impl Drop for RegistryEntryGuard {
	fn drop(&mut self) {
		self.registry.cleanup_transaction(&self.id);
	}
}
