//! Device sessions.
//!
//! A [`Session`] is a cloneable handle to one open channel with a device. Its
//! context owns everything asynchronous about that channel: the table of
//! pending jobs and the installed handlers. Closing the session is the single
//! point that invalidates all of it.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use instr_protocol::{
	CompletionEvent, JobId, JobStatus, LockKind, Operation, RouteSpec, ServiceRequest, SessionId, TransportOutcome,
	TriggerResource,
};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::config::RuntimeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::guard::{Reservation, RouteHandle, ScopedGuard, SessionLock};
use crate::job::AsyncJob;
use crate::manager::{Delivery, SessionTable};
use crate::registry::{CancelOutcome, JobRegistry};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Open,
	Closed,
}

pub(crate) struct SessionContext {
	id: SessionId,
	target: String,
	/// Held for reading by anything that must not overlap a close.
	lifecycle: RwLock<Lifecycle>,
	transport: Arc<dyn Transport>,
	jobs: JobRegistry,
	dispatcher: Dispatcher,
	deliveries: mpsc::UnboundedSender<Delivery>,
	config: Arc<RuntimeConfig>,
	table: Weak<SessionTable>,
}

impl SessionContext {
	pub(crate) fn new(
		id: SessionId,
		target: String,
		transport: Arc<dyn Transport>,
		deliveries: mpsc::UnboundedSender<Delivery>,
		config: Arc<RuntimeConfig>,
		table: Weak<SessionTable>,
	) -> Self {
		Self {
			id,
			target,
			lifecycle: RwLock::new(Lifecycle::Open),
			transport,
			jobs: JobRegistry::new(id),
			dispatcher: Dispatcher::new(id),
			deliveries,
			config,
			table,
		}
	}

	pub(crate) fn id(&self) -> SessionId {
		self.id
	}

	pub(crate) fn is_open(&self) -> bool {
		*self.lifecycle.read() == Lifecycle::Open
	}

	pub(crate) fn transport(&self) -> &dyn Transport {
		&*self.transport
	}

	/// Runs `f` while the session is guaranteed to stay open.
	pub(crate) fn with_open<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
		let lifecycle = self.lifecycle.read();
		if *lifecycle == Lifecycle::Closed {
			return Err(Error::InvalidSession { session: self.id });
		}
		f()
	}

	/// Applies a transport outcome and delivers the resulting event.
	///
	/// Outcomes arriving after close has begun are dropped: close owns the
	/// settlement of every job still pending at that point.
	pub(crate) fn on_transport_outcome(&self, job: JobId, outcome: TransportOutcome) {
		let event = {
			let lifecycle = self.lifecycle.read();
			if *lifecycle == Lifecycle::Closed {
				tracing::trace!(session = %self.id, %job, "Outcome after close dropped");
				return;
			}
			self.jobs.complete(job, outcome)
		};
		if let Some(event) = event {
			self.dispatcher.deliver(&event);
		}
	}

	pub(crate) fn on_service_request(&self, request: &ServiceRequest) {
		self.dispatcher.deliver_service_request(request);
	}

	pub(crate) fn deliver(&self, event: &CompletionEvent) {
		self.dispatcher.deliver(event);
	}

	pub(crate) fn close(&self) {
		let cancelled = {
			let mut lifecycle = self.lifecycle.write();
			if *lifecycle == Lifecycle::Closed {
				return;
			}
			*lifecycle = Lifecycle::Closed;
			self.jobs.cancel_all(&*self.transport)
		};

		self.dispatcher.shutdown();
		self.transport.close_session(self.id);
		if let Some(table) = self.table.upgrade() {
			table.remove(&self.id);
		}
		tracing::debug!(session = %self.id, resource = %self.target, cancelled, "Session closed");
	}
}

/// Handle to an open device session.
///
/// Clones share the same session. Dropping handles does not close it; call
/// [`Session::close`] or [`ResourceManager::close_all`](crate::ResourceManager::close_all).
#[derive(Clone)]
pub struct Session {
	ctx: Arc<SessionContext>,
}

impl Session {
	pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
		Self { ctx }
	}

	pub fn id(&self) -> SessionId {
		self.ctx.id
	}

	/// Resource name the session was opened on.
	pub fn target(&self) -> &str {
		&self.ctx.target
	}

	pub fn is_open(&self) -> bool {
		self.ctx.is_open()
	}

	/// Submits an asynchronous operation and returns its pending job at once.
	///
	/// Fails with [`Error::InvalidSession`] once the session is closed, or with
	/// the transport's error if it refuses to start the operation. Failures
	/// after this point are reported through the job's status.
	pub fn submit(&self, operation: Operation) -> Result<AsyncJob> {
		self.ctx.with_open(|| self.ctx.jobs.submit(self.ctx.transport(), &operation))
	}

	/// Submits a read of up to `capacity` bytes.
	pub fn read_async(&self, capacity: usize) -> Result<AsyncJob> {
		self.submit(Operation::read(capacity))
	}

	/// Submits a read sized by the configured read buffer.
	pub fn read_default(&self) -> Result<AsyncJob> {
		self.read_async(self.ctx.config.read_buffer_size)
	}

	pub fn write_async(&self, payload: impl Into<Vec<u8>>) -> Result<AsyncJob> {
		self.submit(Operation::write(payload))
	}

	/// Cancels a pending job and asks the transport to abort it.
	///
	/// Cancelling a job that already settled is not an error; the outcome
	/// reports the status that won. A successful cancel delivers one
	/// `Cancelled` event to the completion handler.
	pub fn cancel(&self, job: &AsyncJob) -> Result<CancelOutcome> {
		let outcome = self.ctx.jobs.cancel(self.ctx.transport(), job)?;
		if outcome.was_cancelled() {
			let event = CompletionEvent::new(self.ctx.id, job.id(), job.kind(), JobStatus::Cancelled);
			let delivery = Delivery {
				context: Arc::clone(&self.ctx),
				event,
			};
			if self.ctx.deliveries.send(delivery).is_err() {
				tracing::debug!(session = %self.ctx.id, job = %job.id(), "Dispatch loop stopped; cancel event not delivered");
			}
		}
		Ok(outcome)
	}

	/// Terminal status of `job`, or [`Error::NotReady`] while it is pending.
	pub fn result_of(&self, job: &AsyncJob) -> Result<JobStatus> {
		self.check_owned(job)?;
		job.result()
	}

	/// Waits up to `timeout` for `job` to settle. Does not cancel on timeout.
	pub async fn wait(&self, job: &AsyncJob, timeout: Duration) -> Result<JobStatus> {
		self.check_owned(job)?;
		job.wait(timeout).await
	}

	/// Waits for `job` using the configured default window.
	pub async fn wait_default(&self, job: &AsyncJob) -> Result<JobStatus> {
		self.wait(job, self.ctx.config.default_timeout()).await
	}

	/// Number of jobs still pending on this session.
	pub fn pending_jobs(&self) -> usize {
		self.ctx.jobs.pending()
	}

	/// Installs the completion handler, replacing any previous one.
	///
	/// Returns true if a handler was replaced. The handler runs on the
	/// dispatch task, never on the caller's stack.
	pub fn on_completion<F>(&self, handler: F) -> Result<bool>
	where
		F: Fn(&CompletionEvent) + Send + Sync + 'static,
	{
		self.ctx
			.with_open(|| Ok(self.ctx.dispatcher.set_completion_handler(Arc::new(handler))))
	}

	/// Uninstalls the completion handler. Settled jobs are still observable by polling.
	pub fn clear_handler(&self) -> bool {
		self.ctx.dispatcher.clear_completion_handler()
	}

	/// Installs the service-request handler, replacing any previous one.
	pub fn on_service_request<F>(&self, handler: F) -> Result<bool>
	where
		F: Fn(&ServiceRequest) + Send + Sync + 'static,
	{
		self.ctx
			.with_open(|| Ok(self.ctx.dispatcher.set_service_request_handler(Arc::new(handler))))
	}

	pub fn clear_service_request_handler(&self) -> bool {
		self.ctx.dispatcher.clear_service_request_handler()
	}

	/// Reserves a trigger line. A refusal is returned as an `AcquireFailed` guard.
	pub fn reserve_trigger(&self, resource: TriggerResource) -> Result<Reservation> {
		self.ctx
			.with_open(|| Ok(ScopedGuard::acquire(Arc::clone(&self.ctx), resource)))
	}

	/// Maps a trigger route. A refusal is returned as an `AcquireFailed` guard.
	///
	/// The caller is responsible for reserving the lines involved first.
	pub fn map_trigger(&self, route: RouteSpec) -> Result<RouteHandle> {
		self.ctx.with_open(|| Ok(ScopedGuard::acquire(Arc::clone(&self.ctx), route)))
	}

	/// Locks the session's resource against other sessions.
	pub fn lock(&self, kind: LockKind) -> Result<SessionLock> {
		self.ctx.with_open(|| Ok(ScopedGuard::acquire(Arc::clone(&self.ctx), kind)))
	}

	/// Closes the session.
	///
	/// Every pending job is cancelled and aborted on the transport before the
	/// transport session is closed, and handlers are uninstalled, so no
	/// handler runs for this session after `close` returns. Closing twice is a
	/// no-op. Must not be called from inside one of this session's handlers.
	pub fn close(&self) {
		self.ctx.close();
	}

	fn check_owned(&self, job: &AsyncJob) -> Result<()> {
		if job.session() != self.ctx.id {
			return Err(Error::ForeignJob {
				job: job.id(),
				session: self.ctx.id,
			});
		}
		Ok(())
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.ctx.id)
			.field("target", &self.ctx.target)
			.field("open", &self.is_open())
			.finish()
	}
}
