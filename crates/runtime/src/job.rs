//! Asynchronous job handles and their terminal-status cell.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use instr_protocol::{JobId, JobStatus, Operation, OperationKind, SessionId, TransportHandle};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// First-writer-wins terminal status.
///
/// The status is written at most once, so a settled job can never regress to
/// `Pending` or switch to a different terminal state. Readers never observe a
/// partially written value.
pub(crate) struct StatusCell {
	terminal: OnceLock<JobStatus>,
	settled: Notify,
}

impl StatusCell {
	fn new() -> Self {
		Self {
			terminal: OnceLock::new(),
			settled: Notify::new(),
		}
	}

	fn get(&self) -> JobStatus {
		self.terminal.get().copied().unwrap_or(JobStatus::Pending)
	}

	/// Settles into `status`. Returns false if another transition already won.
	fn settle(&self, status: JobStatus) -> bool {
		debug_assert!(status.is_terminal(), "cannot settle into Pending");
		let won = self.terminal.set(status).is_ok();
		if won {
			self.settled.notify_waiters();
		}
		won
	}

	/// Waits until settled or `timeout` elapses.
	///
	/// Registers the waiter before checking to prevent lost wakeups.
	async fn wait(&self, timeout: Duration) -> Option<JobStatus> {
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			let notified = self.settled.notified();

			if let Some(status) = self.terminal.get() {
				return Some(*status);
			}

			tokio::select! {
				biased;
				_ = notified => {}
				_ = tokio::time::sleep_until(deadline) => {
					return self.terminal.get().copied();
				}
			}
		}
	}
}

struct JobInner {
	id: JobId,
	session: SessionId,
	kind: OperationKind,
	capacity: usize,
	handle: OnceLock<TransportHandle>,
	status: StatusCell,
	/// Bytes received by a completed read, until taken.
	data: Mutex<Option<Vec<u8>>>,
}

/// Handle to one asynchronous read or write.
///
/// Clones refer to the same job. The handle stays valid after the job
/// settles and after its session closes; it is freed when the last clone drops.
#[derive(Clone)]
pub struct AsyncJob {
	inner: Arc<JobInner>,
}

impl AsyncJob {
	pub(crate) fn new(id: JobId, session: SessionId, operation: &Operation) -> Self {
		Self {
			inner: Arc::new(JobInner {
				id,
				session,
				kind: operation.kind(),
				capacity: operation.capacity(),
				handle: OnceLock::new(),
				status: StatusCell::new(),
				data: Mutex::new(None),
			}),
		}
	}

	pub fn id(&self) -> JobId {
		self.inner.id
	}

	/// Session that submitted this job.
	pub fn session(&self) -> SessionId {
		self.inner.session
	}

	pub fn kind(&self) -> OperationKind {
		self.inner.kind
	}

	pub fn capacity(&self) -> usize {
		self.inner.capacity
	}

	/// Current status. `Pending` until a terminal transition wins.
	pub fn status(&self) -> JobStatus {
		self.inner.status.get()
	}

	pub fn is_pending(&self) -> bool {
		!self.status().is_terminal()
	}

	/// Terminal status, or [`Error::NotReady`] while pending.
	pub fn result(&self) -> Result<JobStatus> {
		match self.status() {
			JobStatus::Pending => Err(Error::NotReady { job: self.inner.id }),
			status => Ok(status),
		}
	}

	/// Waits up to `timeout` for a terminal status.
	///
	/// Fails with [`Error::Timeout`] if the job is still pending afterwards.
	/// Timing out does not cancel the job.
	pub async fn wait(&self, timeout: Duration) -> Result<JobStatus> {
		self.inner.status.wait(timeout).await.ok_or_else(|| {
			Error::Timeout(format!("{} still pending after {}ms", self.inner.id, timeout.as_millis()))
		})
	}

	/// Takes the bytes received by a completed read. Returns `None` for
	/// writes, unfinished or failed jobs, and on every call after the first.
	pub fn take_data(&self) -> Option<Vec<u8>> {
		self.inner.data.lock().take()
	}

	/// Transport handle, once the transport accepted the operation.
	pub fn transport_handle(&self) -> Option<TransportHandle> {
		self.inner.handle.get().copied()
	}

	pub(crate) fn set_transport_handle(&self, handle: TransportHandle) {
		let _ = self.inner.handle.set(handle);
	}

	/// Settles with `status`, storing `data` only if this transition wins.
	pub(crate) fn settle(&self, status: JobStatus, data: Option<Vec<u8>>) -> bool {
		let mut slot = self.inner.data.lock();
		let won = self.inner.status.settle(status);
		if won {
			*slot = data;
		}
		won
	}
}

impl fmt::Debug for AsyncJob {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AsyncJob")
			.field("id", &self.inner.id)
			.field("session", &self.inner.session)
			.field("kind", &self.inner.kind)
			.field("capacity", &self.inner.capacity)
			.field("status", &self.status())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use instr_protocol::ErrorKind;

	use super::*;

	fn job() -> AsyncJob {
		AsyncJob::new(JobId(1), SessionId(1), &Operation::read(4096))
	}

	#[test]
	fn test_terminal_status_never_overwritten() {
		let job = job();
		assert!(job.result().unwrap_err().is_not_ready());

		assert!(job.settle(JobStatus::Cancelled, None));
		assert!(!job.settle(JobStatus::Completed(37), Some(vec![0; 37])));
		assert!(!job.settle(JobStatus::Failed(ErrorKind::Aborted), None));

		assert_eq!(job.status(), JobStatus::Cancelled);
		assert!(job.take_data().is_none());
	}

	#[test]
	fn test_data_taken_once() {
		let job = job();
		assert!(job.settle(JobStatus::Completed(3), Some(b"abc".to_vec())));
		assert_eq!(job.take_data().as_deref(), Some(&b"abc"[..]));
		assert!(job.take_data().is_none());
	}

	#[test]
	fn test_racing_transitions_exactly_one_wins() {
		for _ in 0..200 {
			let job = job();
			let completer = {
				let job = job.clone();
				thread::spawn(move || job.settle(JobStatus::Completed(37), Some(vec![1; 37])))
			};
			let canceller = {
				let job = job.clone();
				thread::spawn(move || job.settle(JobStatus::Cancelled, None))
			};

			let completed = completer.join().unwrap();
			let cancelled = canceller.join().unwrap();
			assert!(completed ^ cancelled, "exactly one transition must win");

			let expected = if completed {
				JobStatus::Completed(37)
			} else {
				JobStatus::Cancelled
			};
			assert_eq!(job.status(), expected);
			assert_eq!(job.take_data().is_some(), completed);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_wait_times_out_without_cancelling() {
		let job = job();
		let err = job.wait(Duration::from_millis(100)).await.unwrap_err();
		assert!(err.is_timeout());
		assert!(job.is_pending());
	}

	#[tokio::test(start_paused = true)]
	async fn test_wait_wakes_on_settle() {
		let job = job();
		let settler = {
			let job = job.clone();
			tokio::spawn(async move {
				tokio::time::sleep(Duration::from_millis(50)).await;
				job.settle(JobStatus::Completed(37), None);
			})
		};

		let status = job.wait(Duration::from_secs(1)).await.unwrap();
		assert_eq!(status, JobStatus::Completed(37));
		settler.await.unwrap();
	}
}
