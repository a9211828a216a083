//! Per-session table of in-flight asynchronous jobs.
//!
//! The table holds only pending jobs. A job leaves it on the transition that
//! settles it, whether that is the transport's completion or a cancellation,
//! so a notification arriving for a job that is no longer listed is late by
//! definition and is ignored.


use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use instr_protocol::{CompletionEvent, JobId, JobStatus, Operation, SessionId, TransportOutcome};

use crate::error::{Error, Result};
use crate::job::AsyncJob;
use crate::transport::Transport;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
	/// The job was pending and is now cancelled.
	Cancelled,
	/// The job had already settled; the request was ignored.
	AlreadyTerminal(JobStatus),
}

impl CancelOutcome {
	pub fn was_cancelled(&self) -> bool {
		matches!(self, CancelOutcome::Cancelled)
	}
}

pub(crate) struct JobRegistry {
	session: SessionId,
	next_id: AtomicU64,
	pending: DashMap<JobId, AsyncJob>,
}

impl JobRegistry {
	pub(crate) fn new(session: SessionId) -> Self {
		Self {
			session,
			next_id: AtomicU64::new(1),
			pending: DashMap::new(),
		}
	}

	/// Registers a pending job, then starts it on the transport.
	///
	/// The job is listed before `begin` so a completion racing back from the
	/// transport always finds it. If `begin` fails the job is discarded and
	/// the error returned.
	pub(crate) fn submit(&self, transport: &dyn Transport, operation: &Operation) -> Result<AsyncJob> {
		let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
		let job = AsyncJob::new(id, self.session, operation);
		self.pending.insert(id, job.clone());

		match transport.begin(self.session, id, operation) {
			Ok(handle) => {
				job.set_transport_handle(handle);
				tracing::debug!(
					session = %self.session,
					job = %id,
					%handle,
					kind = %operation.kind(),
					capacity = operation.capacity(),
					"Job submitted"
				);
				Ok(job)
			}
			Err(e) => {
				self.pending.remove(&id);
				tracing::debug!(session = %self.session, job = %id, "Job rejected by transport: {}", e);
				Err(e)
			}
		}
	}

	/// Cancels `job` if it is still pending.
	///
	/// On success the transport is asked to abort. Losing the race to a
	/// completion is reported, not treated as an error.
	pub(crate) fn cancel(&self, transport: &dyn Transport, job: &AsyncJob) -> Result<CancelOutcome> {
		if job.session() != self.session {
			return Err(Error::ForeignJob {
				job: job.id(),
				session: self.session,
			});
		}

		if !job.settle(JobStatus::Cancelled, None) {
			let status = job.status();
			tracing::debug!(session = %self.session, job = %job.id(), %status, "Cancel ignored: job already settled");
			return Ok(CancelOutcome::AlreadyTerminal(status));
		}

		self.pending.remove(&job.id());
		match job.transport_handle() {
			Some(handle) => transport.abort(handle),
			None => tracing::warn!(job = %job.id(), "Cancelled job has no transport handle to abort"),
		}
		tracing::debug!(session = %self.session, job = %job.id(), "Job cancelled");
		Ok(CancelOutcome::Cancelled)
	}

	/// Applies a transport outcome to job `id`.
	///
	/// Returns the completion event if this outcome settled the job, or
	/// `None` when the job is unknown or already settled.
	pub(crate) fn complete(&self, id: JobId, outcome: TransportOutcome) -> Option<CompletionEvent> {
		let Some(job) = self.pending.get(&id).map(|entry| entry.value().clone()) else {
			tracing::debug!(session = %self.session, job = %id, "Late notification ignored: job not pending");
			return None;
		};

		let status = outcome.status();
		let data = match outcome {
			TransportOutcome::Completed { mut data, .. } if !data.is_empty() => {
				data.truncate(job.capacity());
				Some(data)
			}
			_ => None,
		};
		let status = match status {
			JobStatus::Completed(count) => JobStatus::Completed(count.min(job.capacity())),
			other => other,
		};

		if !job.settle(status, data) {
			tracing::debug!(session = %self.session, job = %id, "Notification lost race to cancellation");
			return None;
		}

		self.pending.remove(&id);
		tracing::debug!(session = %self.session, job = %id, %status, "Job settled");
		Some(CompletionEvent::new(self.session, id, job.kind(), status))
	}

	/// Cancels every pending job. Returns how many were cancelled.
	pub(crate) fn cancel_all(&self, transport: &dyn Transport) -> usize {
		let jobs: Vec<AsyncJob> = self.pending.iter().map(|entry| entry.value().clone()).collect();
		let mut cancelled = 0;
		for job in &jobs {
			if let Ok(CancelOutcome::Cancelled) = self.cancel(transport, job) {
				cancelled += 1;
			}
		}
		cancelled
	}

	pub(crate) fn pending(&self) -> usize {
		self.pending.len()
	}
}
