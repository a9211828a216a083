//! Completion and service-request handler slots for one session.
//!
//! Handlers run on the resource manager's dispatch task while a read lock on
//! their slot is held. Replacing or clearing a slot takes the write lock, so
//! once [`Dispatcher::shutdown`] returns no handler of the session is running
//! or will run again.
//!
//! Handlers must return quickly. They must not submit jobs or change handlers
//! or close their own session; record what they need and return.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use instr_protocol::{CompletionEvent, ServiceRequest, SessionId};
use parking_lot::RwLock;

/// Callback invoked once per settled job.
pub type CompletionHandler = Arc<dyn Fn(&CompletionEvent) + Send + Sync>;

/// Callback invoked for each service request of the device.
pub type ServiceRequestHandler = Arc<dyn Fn(&ServiceRequest) + Send + Sync>;

pub(crate) struct Dispatcher {
	session: SessionId,
	completion: RwLock<Option<CompletionHandler>>,
	service_request: RwLock<Option<ServiceRequestHandler>>,
}

impl Dispatcher {
	pub(crate) fn new(session: SessionId) -> Self {
		Self {
			session,
			completion: RwLock::new(None),
			service_request: RwLock::new(None),
		}
	}

	/// Installs `handler`, replacing any previous one. Returns true if one was replaced.
	pub(crate) fn set_completion_handler(&self, handler: CompletionHandler) -> bool {
		let replaced = self.completion.write().replace(handler).is_some();
		tracing::debug!(session = %self.session, replaced, "Completion handler installed");
		replaced
	}

	/// Removes the completion handler. Returns true if one was installed.
	pub(crate) fn clear_completion_handler(&self) -> bool {
		self.completion.write().take().is_some()
	}

	pub(crate) fn set_service_request_handler(&self, handler: ServiceRequestHandler) -> bool {
		let replaced = self.service_request.write().replace(handler).is_some();
		tracing::debug!(session = %self.session, replaced, "Service request handler installed");
		replaced
	}

	pub(crate) fn clear_service_request_handler(&self) -> bool {
		self.service_request.write().take().is_some()
	}

	/// Invokes the completion handler, if any. Returns true if it ran.
	pub(crate) fn deliver(&self, event: &CompletionEvent) -> bool {
		let slot = self.completion.read();
		let Some(handler) = slot.as_ref() else {
			tracing::trace!(session = %self.session, job = %event.job, "No completion handler; status left for polling");
			return false;
		};
		if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
			tracing::error!(session = %self.session, job = %event.job, "Completion handler panicked");
		}
		true
	}

	/// Invokes the service-request handler, if any. Returns true if it ran.
	pub(crate) fn deliver_service_request(&self, request: &ServiceRequest) -> bool {
		let slot = self.service_request.read();
		let Some(handler) = slot.as_ref() else {
			tracing::debug!(session = %self.session, "Service request with no handler installed (ignored)");
			return false;
		};
		if catch_unwind(AssertUnwindSafe(|| handler(request))).is_err() {
			tracing::error!(session = %self.session, "Service request handler panicked");
		}
		true
	}

	/// Clears both slots, waiting for any handler that is mid-delivery.
	pub(crate) fn shutdown(&self) {
		self.completion.write().take();
		self.service_request.write().take();
	}
}
