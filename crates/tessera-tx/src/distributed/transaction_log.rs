//! Transaction Log
//!
//! Records the phases of distributed transactions for operators. Entries are
//! keyed by transaction id and hold the latest recorded state. The log is
//! advisory: the coordinator never reads it back to decide an outcome.

use super::core::DistributedState;
use crate::registry::TransactionId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transaction log errors
#[derive(Debug, thiserror::Error)]
pub enum TransactionLogError {
	#[error("Transaction log I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Transaction log serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Transaction log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionLogEntry {
	pub transaction_id: TransactionId,
	pub state: DistributedState,
	/// Participant ids, in protocol order
	pub participants: Vec<String>,
	pub timestamp: DateTime<Utc>,
	pub metadata: HashMap<String, String>,
}

impl TransactionLogEntry {
	/// Create a new log entry stamped with the current time
	pub fn new(
		transaction_id: TransactionId,
		state: DistributedState,
		participants: Vec<String>,
	) -> Self {
		Self {
			transaction_id,
			state,
			participants,
			timestamp: Utc::now(),
			metadata: HashMap::new(),
		}
	}

	/// Add metadata
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// Transaction log interface
pub trait TransactionLog: Send + Sync {
	/// Write a log entry, replacing the previous entry of the same transaction
	fn write(&self, entry: &TransactionLogEntry) -> Result<(), TransactionLogError>;

	/// Read the latest entry of a transaction
	fn read(
		&self,
		transaction_id: &TransactionId,
	) -> Result<Option<TransactionLogEntry>, TransactionLogError>;

	fn read_all(&self) -> Result<Vec<TransactionLogEntry>, TransactionLogError>;

	fn delete(&self, transaction_id: &TransactionId) -> Result<(), TransactionLogError>;

	/// Find transactions whose latest entry is in `state`
	fn find_by_state(
		&self,
		state: DistributedState,
	) -> Result<Vec<TransactionLogEntry>, TransactionLogError> {
		Ok(self
			.read_all()?
			.into_iter()
			.filter(|e| e.state == state)
			.collect())
	}
}

/// In-memory transaction log
///
/// Besides the latest entry per transaction, keeps every written entry so
/// the full phase sequence can be inspected.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionLog {
	entries: Arc<Mutex<HashMap<TransactionId, Vec<TransactionLogEntry>>>>,
}

impl InMemoryTransactionLog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every entry written for a transaction, oldest first
	pub fn history(&self, transaction_id: &TransactionId) -> Vec<TransactionLogEntry> {
		self.entries
			.lock()
			.get(transaction_id)
			.cloned()
			.unwrap_or_default()
	}
}

impl TransactionLog for InMemoryTransactionLog {
	fn write(&self, entry: &TransactionLogEntry) -> Result<(), TransactionLogError> {
		self.entries
			.lock()
			.entry(entry.transaction_id.clone())
			.or_default()
			.push(entry.clone());
		Ok(())
	}

	fn read(
		&self,
		transaction_id: &TransactionId,
	) -> Result<Option<TransactionLogEntry>, TransactionLogError> {
		Ok(self
			.entries
			.lock()
			.get(transaction_id)
			.and_then(|history| history.last().cloned()))
	}

	fn read_all(&self) -> Result<Vec<TransactionLogEntry>, TransactionLogError> {
		Ok(self
			.entries
			.lock()
			.values()
			.filter_map(|history| history.last().cloned())
			.collect())
	}

	fn delete(&self, transaction_id: &TransactionId) -> Result<(), TransactionLogError> {
		self.entries.lock().remove(transaction_id);
		Ok(())
	}
}

/// File-based transaction log
///
/// Persists the latest state of each transaction as `<transaction_id>.json`
/// in a directory.
#[derive(Debug, Clone)]
pub struct FileTransactionLog {
	log_dir: PathBuf,
}

impl FileTransactionLog {
	/// Create a file-based log, creating the directory if needed
	///
	/// # Examples
	///
	/// ```no_run
	/// use tessera_tx::distributed::FileTransactionLog;
	///
	/// let log = FileTransactionLog::new("/var/lib/tessera/2pc").unwrap();
	/// ```
	pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self, TransactionLogError> {
		let log_dir = log_dir.into();
		std::fs::create_dir_all(&log_dir).map_err(|source| TransactionLogError::Io {
			path: log_dir.clone(),
			source,
		})?;
		Ok(Self { log_dir })
	}

	pub fn log_dir(&self) -> &Path {
		&self.log_dir
	}

	fn entry_path(&self, transaction_id: &TransactionId) -> PathBuf {
		self.log_dir.join(format!("{}.json", transaction_id))
	}

	fn read_path(path: &Path) -> Result<TransactionLogEntry, TransactionLogError> {
		let json = std::fs::read_to_string(path).map_err(|source| TransactionLogError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(serde_json::from_str(&json)?)
	}
}

impl TransactionLog for FileTransactionLog {
	fn write(&self, entry: &TransactionLogEntry) -> Result<(), TransactionLogError> {
		let path = self.entry_path(&entry.transaction_id);
		let json = serde_json::to_string_pretty(entry)?;
		std::fs::write(&path, json).map_err(|source| TransactionLogError::Io { path, source })
	}

	fn read(
		&self,
		transaction_id: &TransactionId,
	) -> Result<Option<TransactionLogEntry>, TransactionLogError> {
		let path = self.entry_path(transaction_id);
		if !path.exists() {
			return Ok(None);
		}
		Self::read_path(&path).map(Some)
	}

	fn read_all(&self) -> Result<Vec<TransactionLogEntry>, TransactionLogError> {
		let io_error = |source| TransactionLogError::Io {
			path: self.log_dir.clone(),
			source,
		};

		let mut entries = Vec::new();
		for dir_entry in std::fs::read_dir(&self.log_dir).map_err(io_error)? {
			let path = dir_entry.map_err(io_error)?.path();
			if path.extension().and_then(|s| s.to_str()) == Some("json") {
				entries.push(Self::read_path(&path)?);
			}
		}
		Ok(entries)
	}

	fn delete(&self, transaction_id: &TransactionId) -> Result<(), TransactionLogError> {
		let path = self.entry_path(transaction_id);
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(source) => Err(TransactionLogError::Io { path, source }),
		}
	}
}
