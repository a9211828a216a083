//! In-process simulated instrument transport.
//!
//! [`SimTransport`] stands in for a real resource manager in tests and in the
//! demo CLI. Resources are registered by name, operations are completed by
//! script (or by an auto-reply after a delay), and every trait call is
//! recorded in order so callers can assert exactly which hardware effects
//! were issued.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use instr_protocol::{
	ErrorKind, JobId, LockKind, Operation, OperationKind, RouteSpec, ServiceRequest, SessionId, TransportHandle,
	TransportNotification, TransportOutcome, TriggerResource,
};
use parking_lot::Mutex;

use super::{NotificationReceiver, NotificationSender, Transport, notification_channel, resource_expression};
use crate::error::{Error, Result};

/// A transport call as recorded by [`SimTransport::calls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
	OpenSession { target: String },
	CloseSession { session: SessionId },
	Begin { session: SessionId, job: JobId, kind: OperationKind },
	Abort { handle: TransportHandle },
	AcquireResource { session: SessionId, resource: TriggerResource },
	ReleaseResource { session: SessionId, resource: TriggerResource },
	MapRoute { session: SessionId, route: RouteSpec },
	UnmapRoute { session: SessionId, route: RouteSpec },
	Lock { session: SessionId, kind: LockKind },
	Unlock { session: SessionId },
}

impl TransportCall {
	/// True for calls that claim or return backplane hardware or locks.
	pub fn is_guard_call(&self) -> bool {
		matches!(
			self,
			TransportCall::AcquireResource { .. }
				| TransportCall::ReleaseResource { .. }
				| TransportCall::MapRoute { .. }
				| TransportCall::UnmapRoute { .. }
				| TransportCall::Lock { .. }
				| TransportCall::Unlock { .. }
		)
	}
}

#[derive(Debug, Clone)]
struct AutoReply {
	data: Vec<u8>,
	delay: Duration,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
	session: SessionId,
	job: JobId,
	capacity: usize,
}

#[derive(Default)]
struct SimState {
	/// Known resource names and their optional auto-reply.
	resources: HashMap<String, Option<AutoReply>>,
	sessions: HashMap<SessionId, String>,
	in_flight: HashMap<TransportHandle, InFlight>,
	busy_triggers: HashSet<TriggerResource>,
	reserved: HashMap<TriggerResource, SessionId>,
	refused_routes: HashSet<RouteSpec>,
	/// Mapped routes and the session that mapped each.
	routes: HashMap<RouteSpec, SessionId>,
	/// Resources whose driver rejects every new operation.
	faulted: HashSet<String>,
	/// Lock holders per resource name.
	locks: HashMap<String, Vec<(SessionId, LockKind)>>,
	calls: Vec<TransportCall>,
}

impl SimState {
	fn locked_out(&self, session: SessionId, target: &str) -> bool {
		self.locks
			.get(target)
			.is_some_and(|holders| holders.iter().any(|(s, k)| *s != session && *k == LockKind::Exclusive))
	}

	fn handle_for(&self, session: SessionId, job: JobId) -> Option<TransportHandle> {
		self.in_flight
			.iter()
			.find(|(_, op)| op.session == session && op.job == job)
			.map(|(handle, _)| *handle)
	}
}

struct SimInner {
	notifications: NotificationSender,
	next_session: AtomicU64,
	next_handle: AtomicU64,
	state: Mutex<SimState>,
}

impl SimInner {
	fn notify(&self, notification: TransportNotification) {
		if self.notifications.send(notification).is_err() {
			tracing::debug!("SimTransport: notification dropped, receiver closed");
		}
	}

	/// Completes `handle` only if it is still in flight.
	fn finish_in_flight(&self, handle: TransportHandle, outcome: TransportOutcome) {
		let Some(op) = self.state.lock().in_flight.remove(&handle) else {
			tracing::trace!(%handle, "SimTransport: auto-reply skipped, operation no longer in flight");
			return;
		};
		self.notify(TransportNotification::Io {
			session: op.session,
			job: op.job,
			outcome,
		});
	}
}

/// Simulated resource manager and instrument set.
///
/// Cloning shares the same simulated hardware.
#[derive(Clone)]
pub struct SimTransport {
	inner: Arc<SimInner>,
}

impl SimTransport {
	/// Creates a simulator with no resources, plus the receiver for its notifications.
	pub fn new() -> (Self, NotificationReceiver) {
		let (tx, rx) = notification_channel();
		let transport = Self {
			inner: Arc::new(SimInner {
				notifications: tx,
				next_session: AtomicU64::new(1),
				next_handle: AtomicU64::new(1),
				state: Mutex::new(SimState::default()),
			}),
		};
		(transport, rx)
	}

	/// Registers a resource name that sessions may open.
	pub fn with_resource(self, target: &str) -> Self {
		self.add_resource(target);
		self
	}

	pub fn add_resource(&self, target: &str) {
		self.inner.state.lock().resources.entry(target.to_string()).or_insert(None);
	}

	/// Makes every operation on `target` complete by itself after `delay`.
	///
	/// Reads receive `data` truncated to the job's capacity; writes report
	/// their full payload as written. Unknown resources are left unknown.
	pub fn respond_with(&self, target: &str, data: impl Into<Vec<u8>>, delay: Duration) {
		match self.inner.state.lock().resources.get_mut(target) {
			Some(reply) => {
				*reply = Some(AutoReply {
					data: data.into(),
					delay,
				})
			}
			None => tracing::debug!(resource = target, "SimTransport: auto-reply for unknown resource ignored"),
		}
	}

	/// Marks a trigger line as held by some other driver.
	pub fn set_busy(&self, resource: TriggerResource) {
		self.inner.state.lock().busy_triggers.insert(resource);
	}

	/// Makes the hardware refuse `route`.
	pub fn refuse_route(&self, route: RouteSpec) {
		self.inner.state.lock().refused_routes.insert(route);
	}

	/// Makes every later `begin` on `target` fail with a transport error.
	pub fn fault(&self, target: &str) {
		self.inner.state.lock().faulted.insert(target.to_string());
	}

	/// Registered resource names matching a VISA-style `expression`, sorted.
	///
	/// `?` matches any character, `*` repeats the previous one, and `[...]`
	/// is a character class. Matching ignores case. `"?*INSTR"` finds every
	/// instrument.
	pub fn find_resources(&self, expression: &str) -> Result<Vec<String>> {
		let matcher = resource_expression(expression)?;
		let mut found: Vec<String> = self
			.inner
			.state
			.lock()
			.resources
			.keys()
			.filter(|name| matcher.is_match(name))
			.cloned()
			.collect();
		found.sort();
		Ok(found)
	}

	/// Reports a finished read for `job`, whether or not it is still in flight.
	///
	/// Delivering for an aborted job models a transport that completed the
	/// operation before the abort reached it. Returns true if the job was in flight.
	pub fn complete(&self, session: SessionId, job: JobId, data: impl Into<Vec<u8>>) -> bool {
		let mut data = data.into();
		let was_in_flight = {
			let mut state = self.inner.state.lock();
			match state.handle_for(session, job) {
				Some(handle) => {
					if let Some(op) = state.in_flight.remove(&handle) {
						data.truncate(op.capacity);
					}
					true
				}
				None => false,
			}
		};
		self.inner.notify(TransportNotification::Io {
			session,
			job,
			outcome: TransportOutcome::read(data),
		});
		was_in_flight
	}

	/// Reports an arbitrary outcome for `job`, whether or not it is still in flight.
	pub fn finish(&self, session: SessionId, job: JobId, outcome: TransportOutcome) -> bool {
		let was_in_flight = {
			let mut state = self.inner.state.lock();
			match state.handle_for(session, job) {
				Some(handle) => state.in_flight.remove(&handle).is_some(),
				None => false,
			}
		};
		self.inner.notify(TransportNotification::Io { session, job, outcome });
		was_in_flight
	}

	/// Reports a transport failure for `job`.
	pub fn fail(&self, session: SessionId, job: JobId, kind: ErrorKind) -> bool {
		self.finish(session, job, TransportOutcome::Failed(kind))
	}

	/// Asserts a service request from the device behind `session`.
	pub fn raise_srq(&self, session: SessionId, status_byte: u8) {
		self.inner.notify(TransportNotification::ServiceRequest(ServiceRequest {
			session,
			status_byte,
		}));
	}

	/// Every recorded call, in order.
	pub fn calls(&self) -> Vec<TransportCall> {
		self.inner.state.lock().calls.clone()
	}

	/// Recorded reserve/route/lock calls only, in order.
	pub fn guard_calls(&self) -> Vec<TransportCall> {
		self.inner
			.state
			.lock()
			.calls
			.iter()
			.filter(|call| call.is_guard_call())
			.cloned()
			.collect()
	}

	pub fn in_flight(&self) -> usize {
		self.inner.state.lock().in_flight.len()
	}

	pub fn is_reserved(&self, resource: &TriggerResource) -> bool {
		self.inner.state.lock().reserved.contains_key(resource)
	}

	pub fn is_routed(&self, route: &RouteSpec) -> bool {
		self.inner.state.lock().routes.contains_key(route)
	}

	pub fn open_sessions(&self) -> usize {
		self.inner.state.lock().sessions.len()
	}
}

impl Transport for SimTransport {
	fn open_session(&self, target: &str) -> Result<SessionId> {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::OpenSession {
			target: target.to_string(),
		});
		if !state.resources.contains_key(target) {
			return Err(Error::ResourceNotFound(target.to_string()));
		}
		let session = SessionId(self.inner.next_session.fetch_add(1, Ordering::SeqCst));
		state.sessions.insert(session, target.to_string());
		Ok(session)
	}

	fn close_session(&self, session: SessionId) {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::CloseSession { session });
		state.sessions.remove(&session);
		state.in_flight.retain(|_, op| op.session != session);
		state.reserved.retain(|_, holder| *holder != session);
		state.routes.retain(|_, holder| *holder != session);
		for holders in state.locks.values_mut() {
			holders.retain(|(holder, _)| *holder != session);
		}
	}

	fn begin(&self, session: SessionId, job: JobId, operation: &Operation) -> Result<TransportHandle> {
		let (handle, reply) = {
			let mut state = self.inner.state.lock();
			state.calls.push(TransportCall::Begin {
				session,
				job,
				kind: operation.kind(),
			});
			let Some(target) = state.sessions.get(&session).cloned() else {
				return Err(Error::InvalidSession { session });
			};
			if state.locked_out(session, &target) {
				return Err(Error::ResourceLocked(target));
			}
			if state.faulted.contains(&target) {
				return Err(Error::TransportError(format!("{target} rejected {}", operation.kind())));
			}
			let handle = TransportHandle(self.inner.next_handle.fetch_add(1, Ordering::SeqCst));
			state.in_flight.insert(
				handle,
				InFlight {
					session,
					job,
					capacity: operation.capacity(),
				},
			);
			let reply = state.resources.get(&target).cloned().flatten();
			(handle, reply)
		};

		if let Some(reply) = reply {
			let outcome = match operation {
				Operation::Read { capacity } => {
					let mut data = reply.data;
					data.truncate(*capacity);
					TransportOutcome::read(data)
				}
				Operation::Write { payload } => TransportOutcome::written(payload.len()),
			};
			match tokio::runtime::Handle::try_current() {
				Ok(runtime) => {
					let inner = Arc::clone(&self.inner);
					runtime.spawn(async move {
						tokio::time::sleep(reply.delay).await;
						inner.finish_in_flight(handle, outcome);
					});
				}
				Err(_) => tracing::warn!(%handle, "SimTransport: no tokio runtime, auto-reply disabled"),
			}
		}

		Ok(handle)
	}

	fn abort(&self, handle: TransportHandle) {
		let aborted = {
			let mut state = self.inner.state.lock();
			state.calls.push(TransportCall::Abort { handle });
			state.in_flight.remove(&handle)
		};
		if let Some(op) = aborted {
			self.inner.notify(TransportNotification::Io {
				session: op.session,
				job: op.job,
				outcome: TransportOutcome::Failed(ErrorKind::Aborted),
			});
		}
	}

	fn acquire_resource(&self, session: SessionId, resource: &TriggerResource) -> bool {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::AcquireResource {
			session,
			resource: *resource,
		});
		if state.busy_triggers.contains(resource) {
			return false;
		}
		match state.reserved.get(resource) {
			Some(holder) if *holder != session => false,
			_ => {
				state.reserved.insert(*resource, session);
				true
			}
		}
	}

	fn release_resource(&self, session: SessionId, resource: &TriggerResource) {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::ReleaseResource {
			session,
			resource: *resource,
		});
		if state.reserved.get(resource) == Some(&session) {
			state.reserved.remove(resource);
		}
	}

	fn map_route(&self, session: SessionId, route: &RouteSpec) -> bool {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::MapRoute { session, route: *route });
		if state.refused_routes.contains(route) {
			return false;
		}
		match state.routes.entry(*route) {
			Entry::Occupied(_) => false,
			Entry::Vacant(slot) => {
				slot.insert(session);
				true
			}
		}
	}

	fn unmap_route(&self, session: SessionId, route: &RouteSpec) {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::UnmapRoute { session, route: *route });
		if state.routes.get(route) == Some(&session) {
			state.routes.remove(route);
		}
	}

	fn lock(&self, session: SessionId, kind: LockKind) -> bool {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::Lock { session, kind });
		let Some(target) = state.sessions.get(&session).cloned() else {
			return false;
		};
		let holders = state.locks.entry(target).or_default();
		let conflict = holders
			.iter()
			.any(|(holder, held)| *holder != session && (kind == LockKind::Exclusive || *held == LockKind::Exclusive));
		if conflict {
			return false;
		}
		holders.retain(|(holder, _)| *holder != session);
		holders.push((session, kind));
		true
	}

	fn unlock(&self, session: SessionId) {
		let mut state = self.inner.state.lock();
		state.calls.push(TransportCall::Unlock { session });
		if let Some(target) = state.sessions.get(&session).cloned() {
			if let Some(holders) = state.locks.get_mut(&target) {
				holders.retain(|(holder, _)| *holder != session);
			}
		}
	}
}
