//! Two-phase commit coordinator

use super::transaction_log::{TransactionLog, TransactionLogEntry};
use crate::config::DistributedOptions;
use crate::registry::TransactionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A resource taking part in a distributed transaction
///
/// Implemented outside the engine, typically over a connection to another
/// database or a remote service.
#[async_trait]
pub trait Participant: Send + Sync {
	/// Value produced by a successful commit
	type Output: Send;

	fn id(&self) -> &str;

	async fn prepare(&self, transaction_id: &TransactionId) -> anyhow::Result<()>;

	async fn commit(&self, transaction_id: &TransactionId) -> anyhow::Result<Self::Output>;

	async fn rollback(&self, transaction_id: &TransactionId) -> anyhow::Result<()>;
}

/// Protocol state recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributedState {
	Preparing,
	Prepared,
	Committing,
	Committed,
	RolledBack,
	Failed,
}

/// Phase in which a distributed transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributedPhase {
	Prepare,
	Commit,
}

impl fmt::Display for DistributedPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DistributedPhase::Prepare => f.write_str("prepare"),
			DistributedPhase::Commit => f.write_str("commit"),
		}
	}
}

/// Furthest protocol step a participant reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
	Pending,
	Prepared,
	PrepareFailed,
	Committed,
	CommitFailed,
}

impl fmt::Display for ParticipantStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ParticipantStatus::Pending => "pending",
			ParticipantStatus::Prepared => "prepared",
			ParticipantStatus::PrepareFailed => "prepare-failed",
			ParticipantStatus::Committed => "committed",
			ParticipantStatus::CommitFailed => "commit-failed",
		};
		f.write_str(name)
	}
}

/// Whether a participant was rolled back after a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
	NotAttempted,
	RolledBack,
	Failed(String),
}

/// Per-participant outcome of a failed distributed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantReport {
	pub participant: String,
	pub status: ParticipantStatus,
	pub rollback: RollbackOutcome,
	/// Error returned by the failing prepare or commit call
	pub error: Option<String>,
}

impl ParticipantReport {
	fn new(participant: &str) -> Self {
		Self {
			participant: participant.to_string(),
			status: ParticipantStatus::Pending,
			rollback: RollbackOutcome::NotAttempted,
			error: None,
		}
	}
}

impl fmt::Display for ParticipantReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={}", self.participant, self.status)?;
		match &self.rollback {
			RollbackOutcome::NotAttempted => Ok(()),
			RollbackOutcome::RolledBack => f.write_str(" (rolled back)"),
			RollbackOutcome::Failed(error) => write!(f, " (rollback failed: {})", error),
		}
	}
}

/// A distributed transaction failed in its prepare or commit phase
#[derive(Debug, thiserror::Error)]
#[error(
	"Distributed transaction {transaction_id} failed in {phase} phase [{}]: {cause}",
	summarize(.participants)
)]
pub struct DistributedTransactionError {
	pub transaction_id: TransactionId,
	pub phase: DistributedPhase,
	/// One report per participant, in protocol order
	pub participants: Vec<ParticipantReport>,
	#[source]
	pub cause: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl DistributedTransactionError {
	/// Report of the participant with the given id
	pub fn report(&self, participant: &str) -> Option<&ParticipantReport> {
		self.participants
			.iter()
			.find(|report| report.participant == participant)
	}
}

fn summarize(participants: &[ParticipantReport]) -> String {
	participants
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(", ")
}

/// A participant call exceeded the phase timeout
#[derive(Debug, thiserror::Error)]
#[error("Participant '{participant}' did not finish {phase} within {timeout:?}")]
pub struct PhaseTimeoutError {
	pub participant: String,
	pub phase: &'static str,
	pub timeout: Duration,
}

/// Drives prepare/commit/rollback across participants
///
/// There is no durable commit decision: once a commit has succeeded on some
/// participant, a later commit failure leaves the participants inconsistent
/// unless their rollback can undo a commit. The optional transaction log only
/// records what happened.
#[derive(Clone, Default)]
pub struct DistributedCoordinator {
	log: Option<Arc<dyn TransactionLog>>,
}

impl DistributedCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record phase transitions in `log`
	pub fn with_log(mut self, log: Arc<dyn TransactionLog>) -> Self {
		self.log = Some(log);
		self
	}

	/// Run the two-phase protocol over `participants`, in order
	///
	/// Returns the commit outputs in participant order.
	pub async fn execute_distributed_transaction<T>(
		&self,
		participants: &[Arc<dyn Participant<Output = T>>],
		options: &DistributedOptions,
	) -> Result<Vec<T>, DistributedTransactionError>
	where
		T: Send,
	{
		let transaction_id = TransactionId::new();
		let ids: Vec<String> = participants.iter().map(|p| p.id().to_string()).collect();
		let mut reports: Vec<ParticipantReport> =
			ids.iter().map(|id| ParticipantReport::new(id)).collect();
		let timeout = options.phase_timeout;

		tracing::debug!(
			transaction_id = %transaction_id,
			participants = ids.len(),
			"Starting distributed transaction"
		);
		self.record(&transaction_id, DistributedState::Preparing, &ids);

		for (index, participant) in participants.iter().enumerate() {
			let prepared = call(
				timeout,
				participant.id(),
				"prepare",
				participant.prepare(&transaction_id),
			)
			.await;

			let error = match prepared {
				Ok(()) => {
					reports[index].status = ParticipantStatus::Prepared;
					continue;
				}
				Err(error) => error,
			};

			tracing::warn!(
				transaction_id = %transaction_id,
				participant = participant.id(),
				error = %error,
				"Prepare failed"
			);
			reports[index].status = ParticipantStatus::PrepareFailed;
			reports[index].error = Some(error.to_string());

			let state = if options.rollback_on_prepare_failure {
				let attempted = &participants[..=index];
				self.rollback_all(&transaction_id, attempted, &mut reports, timeout)
					.await;
				DistributedState::RolledBack
			} else {
				DistributedState::Failed
			};
			self.record(&transaction_id, state, &ids);

			return Err(DistributedTransactionError {
				transaction_id,
				phase: DistributedPhase::Prepare,
				participants: reports,
				cause: error.into(),
			});
		}

		self.record(&transaction_id, DistributedState::Prepared, &ids);
		self.record(&transaction_id, DistributedState::Committing, &ids);

		let mut outputs = Vec::with_capacity(participants.len());
		for (index, participant) in participants.iter().enumerate() {
			let committed = call(
				timeout,
				participant.id(),
				"commit",
				participant.commit(&transaction_id),
			)
			.await;

			match committed {
				Ok(output) => {
					reports[index].status = ParticipantStatus::Committed;
					outputs.push(output);
				}
				Err(error) => {
					tracing::error!(
						transaction_id = %transaction_id,
						participant = participant.id(),
						error = %error,
						"Commit failed, rolling back every participant"
					);
					reports[index].status = ParticipantStatus::CommitFailed;
					reports[index].error = Some(error.to_string());

					self.rollback_all(&transaction_id, participants, &mut reports, timeout)
						.await;
					self.record(&transaction_id, DistributedState::Failed, &ids);

					return Err(DistributedTransactionError {
						transaction_id,
						phase: DistributedPhase::Commit,
						participants: reports,
						cause: error.into(),
					});
				}
			}
		}

		self.record(&transaction_id, DistributedState::Committed, &ids);
		tracing::debug!(transaction_id = %transaction_id, "Distributed transaction committed");
		Ok(outputs)
	}

	/// Best-effort rollback of `participants`, in order
	async fn rollback_all<T: Send>(
		&self,
		transaction_id: &TransactionId,
		participants: &[Arc<dyn Participant<Output = T>>],
		reports: &mut [ParticipantReport],
		timeout: Option<Duration>,
	) {
		for (participant, report) in participants.iter().zip(reports.iter_mut()) {
			let result = call(
				timeout,
				participant.id(),
				"rollback",
				participant.rollback(transaction_id),
			)
			.await;

			report.rollback = match result {
				Ok(()) => RollbackOutcome::RolledBack,
				Err(error) => {
					tracing::warn!(
						transaction_id = %transaction_id,
						participant = participant.id(),
						error = %error,
						"Participant rollback failed"
					);
					RollbackOutcome::Failed(error.to_string())
				}
			};
		}
	}

	fn record(&self, transaction_id: &TransactionId, state: DistributedState, participants: &[String]) {
		let Some(log) = &self.log else {
			return;
		};
		let entry = TransactionLogEntry::new(transaction_id.clone(), state, participants.to_vec());
		if let Err(error) = log.write(&entry) {
			tracing::warn!(
				transaction_id = %transaction_id,
				?state,
				%error,
				"Failed to write transaction log entry"
			);
		}
	}
}

impl fmt::Debug for DistributedCoordinator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DistributedCoordinator")
			.field("log", &self.log.is_some())
			.finish()
	}
}

async fn call<R>(
	timeout: Option<Duration>,
	participant: &str,
	phase: &'static str,
	future: impl Future<Output = anyhow::Result<R>>,
) -> anyhow::Result<R> {
	match timeout {
		Some(limit) => tokio::time::timeout(limit, future)
			.await
			.map_err(|_| {
				anyhow::Error::new(PhaseTimeoutError {
					participant: participant.to_string(),
					phase,
					timeout: limit,
				})
			})?,
		None => future.await,
	}
}
