//! Distributed (two-phase) transactions
//!
//! The coordinator prepares every participant in order, then commits every
//! participant in order. A commit failure rolls back all participants,
//! including those that already committed.

pub mod core;
pub mod transaction_log;

pub use self::core::{
	DistributedCoordinator, DistributedPhase, DistributedState, DistributedTransactionError,
	Participant, ParticipantReport, ParticipantStatus, PhaseTimeoutError, RollbackOutcome,
};
pub use self::transaction_log::{
	FileTransactionLog, InMemoryTransactionLog, TransactionLog, TransactionLogEntry,
	TransactionLogError,
};
