//! Scoped acquire/release guards for shared hardware.
//!
//! Backplane trigger lines and routes are shared between drivers. Releasing
//! one that this caller never acquired can undo another component's
//! reservation, so a [`ScopedGuard`] performs its release only after its own
//! acquire succeeded, only once, and only for the identity it acquired.
//!
//! | guard | acquire | release |
//! |-------|---------|---------|
//! | [`Reservation`] | reserve trigger line | unreserve |
//! | [`RouteHandle`] | map trigger route | unmap |
//! | [`SessionLock`] | lock resource | unlock |

use std::fmt;
use std::sync::Arc;

use instr_protocol::{LockKind, RouteSpec, SessionId, TriggerResource};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::session::SessionContext;
use crate::transport::Transport;

/// Private module for the sealed trait pattern.
mod private {
	pub trait Sealed {}
}

/// A resource identity with a paired acquire/release on the transport.
///
/// Sealed: the pairs are fixed by the transport interface.
pub trait Pairing: private::Sealed + fmt::Display + Send + Sync + 'static {
	#[doc(hidden)]
	fn acquire(&self, transport: &dyn Transport, session: SessionId) -> bool;
	#[doc(hidden)]
	fn release(&self, transport: &dyn Transport, session: SessionId);
}

impl private::Sealed for TriggerResource {}
impl Pairing for TriggerResource {
	fn acquire(&self, transport: &dyn Transport, session: SessionId) -> bool {
		transport.acquire_resource(session, self)
	}

	fn release(&self, transport: &dyn Transport, session: SessionId) {
		transport.release_resource(session, self)
	}
}

impl private::Sealed for RouteSpec {}
impl Pairing for RouteSpec {
	fn acquire(&self, transport: &dyn Transport, session: SessionId) -> bool {
		transport.map_route(session, self)
	}

	fn release(&self, transport: &dyn Transport, session: SessionId) {
		transport.unmap_route(session, self)
	}
}

impl private::Sealed for LockKind {}
impl Pairing for LockKind {
	fn acquire(&self, transport: &dyn Transport, session: SessionId) -> bool {
		transport.lock(session, *self)
	}

	fn release(&self, transport: &dyn Transport, session: SessionId) {
		transport.unlock(session)
	}
}

/// State of a [`ScopedGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
	/// The acquire succeeded and has not been released.
	Acquired,
	/// Released; further releases are no-ops.
	Released,
	/// The acquire was refused. Terminal; release is a no-op.
	AcquireFailed,
}

/// Trigger line reservation.
pub type Reservation = ScopedGuard<TriggerResource>;

/// Trigger route mapping.
pub type RouteHandle = ScopedGuard<RouteSpec>;

/// Lock on a session's resource.
pub type SessionLock = ScopedGuard<LockKind>;

/// Result of an acquire whose release is gated on that acquire's success.
///
/// An acquired guard is released by [`ScopedGuard::release`] or on drop.
pub struct ScopedGuard<P: Pairing> {
	resource: P,
	session: Arc<SessionContext>,
	state: Mutex<GuardState>,
}

impl<P: Pairing> ScopedGuard<P> {
	/// Issues the acquire. A refusal is not an error: the guard comes back in
	/// [`GuardState::AcquireFailed`] and the caller decides whether to go on.
	pub(crate) fn acquire(session: Arc<SessionContext>, resource: P) -> Self {
		let state = if resource.acquire(session.transport(), session.id()) {
			tracing::debug!(session = %session.id(), "Acquired {}", resource);
			GuardState::Acquired
		} else {
			tracing::warn!(session = %session.id(), "Acquire refused: {}", resource);
			GuardState::AcquireFailed
		};
		Self {
			resource,
			session,
			state: Mutex::new(state),
		}
	}

	pub fn resource(&self) -> &P {
		&self.resource
	}

	pub fn session(&self) -> SessionId {
		self.session.id()
	}

	pub fn state(&self) -> GuardState {
		*self.state.lock()
	}

	pub fn is_acquired(&self) -> bool {
		self.state() == GuardState::Acquired
	}

	/// Converts a refused acquire into [`Error::AcquireFailed`].
	pub fn require(self) -> Result<Self> {
		if self.state() == GuardState::AcquireFailed {
			return Err(Error::AcquireFailed(self.resource.to_string()));
		}
		Ok(self)
	}

	/// Releases the resource if this guard acquired it.
	///
	/// Returns true only for the call that issued the underlying release.
	/// Releasing a refused or already released guard succeeds as a no-op. If
	/// the session has closed, the transport already returned the hardware
	/// with it, so no release is issued.
	pub fn release(&self) -> bool {
		let mut state = self.state.lock();
		if *state != GuardState::Acquired {
			return false;
		}
		*state = GuardState::Released;

		let released = self.session.with_open(|| {
			self.resource.release(self.session.transport(), self.session.id());
			Ok(())
		});
		if released.is_err() {
			tracing::debug!(session = %self.session.id(), "Release skipped, session closed: {}", self.resource);
			return false;
		}
		tracing::debug!(session = %self.session.id(), "Released {}", self.resource);
		true
	}
}

impl<P: Pairing> Drop for ScopedGuard<P> {
	fn drop(&mut self) {
		self.release();
	}
}

impl<P: Pairing + fmt::Debug> fmt::Debug for ScopedGuard<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopedGuard")
			.field("resource", &self.resource)
			.field("session", &self.session.id())
			.field("state", &self.state())
			.finish()
	}
}
