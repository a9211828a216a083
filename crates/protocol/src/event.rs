//! Notifications flowing from the transport to the runtime and on to handlers.

use serde::{Deserialize, Serialize};

use crate::status::{ErrorKind, JobStatus};
use crate::types::{JobId, OperationKind, SessionId};

/// Delivered to a session's completion handler once per settled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
	pub session: SessionId,
	pub job: JobId,
	pub kind: OperationKind,
	/// Terminal status of the job. Never `Pending`.
	pub status: JobStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub byte_count: Option<usize>,
}

impl CompletionEvent {
	pub fn new(session: SessionId, job: JobId, kind: OperationKind, status: JobStatus) -> Self {
		Self {
			session,
			job,
			kind,
			status,
			byte_count: status.byte_count(),
		}
	}
}

/// A device-initiated service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
	pub session: SessionId,
	/// Serial poll status byte read while servicing the request.
	pub status_byte: u8,
}

/// What the transport reports when an operation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
	/// The operation finished. For reads, `data` holds the bytes received;
	/// for writes, `data` is empty and `transferred` is the count written.
	Completed { data: Vec<u8>, transferred: usize },
	Failed(ErrorKind),
}

impl TransportOutcome {
	/// A completed read carrying `data`.
	pub fn read(data: impl Into<Vec<u8>>) -> Self {
		let data = data.into();
		let transferred = data.len();
		TransportOutcome::Completed { data, transferred }
	}

	/// A completed write of `transferred` bytes.
	pub fn written(transferred: usize) -> Self {
		TransportOutcome::Completed {
			data: Vec::new(),
			transferred,
		}
	}

	/// Status the job settles into for this outcome.
	pub fn status(&self) -> JobStatus {
		match self {
			TransportOutcome::Completed { transferred, .. } => JobStatus::Completed(*transferred),
			TransportOutcome::Failed(kind) => JobStatus::Failed(*kind),
		}
	}
}

/// Out-of-band notification sent by a transport on its notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotification {
	/// An asynchronous operation ended.
	Io {
		session: SessionId,
		job: JobId,
		outcome: TransportOutcome,
	},
	/// The device asserted a service request.
	ServiceRequest(ServiceRequest),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn completion_event_carries_byte_count_only_when_completed() {
		let done = CompletionEvent::new(SessionId(1), JobId(2), OperationKind::Read, JobStatus::Completed(37));
		assert_eq!(done.byte_count, Some(37));

		let cancelled = CompletionEvent::new(SessionId(1), JobId(3), OperationKind::Read, JobStatus::Cancelled);
		assert_eq!(cancelled.byte_count, None);
		let json = serde_json::to_value(&cancelled).unwrap();
		assert!(json.get("byteCount").is_none());
	}

	#[test]
	fn outcome_status_matches_transfer() {
		assert_eq!(TransportOutcome::read(vec![0u8; 37]).status(), JobStatus::Completed(37));
		assert_eq!(TransportOutcome::written(12).status(), JobStatus::Completed(12));
		assert_eq!(
			TransportOutcome::Failed(ErrorKind::TransportTimeout).status(),
			JobStatus::Failed(ErrorKind::TransportTimeout)
		);
	}
}
