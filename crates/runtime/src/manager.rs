//! Resource manager and completion dispatch loop.
//!
//! The manager opens sessions on its transport and runs the single delivery
//! path for all of them:
//!
//! 1. A caller submits a job through a [`Session`]; the transport starts it
//! 2. The transport later sends a [`TransportNotification`] on its channel
//! 3. [`ResourceManager::run`] routes the notification to the owning session
//! 4. The session settles the job and invokes its handler on this task
//!
//! Cancellation events take the same path through an internal channel, so a
//! handler never runs on the stack of the code that submitted or cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use instr_protocol::{CompletionEvent, SessionId, TransportNotification};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::session::{Session, SessionContext};
use crate::transport::{NotificationReceiver, Transport};

/// Open sessions by id.
pub(crate) type SessionTable = DashMap<SessionId, Arc<SessionContext>>;

/// An event produced off the dispatch task, queued for delivery on it.
pub(crate) struct Delivery {
	pub(crate) context: Arc<SessionContext>,
	pub(crate) event: CompletionEvent,
}

/// Entry point: opens sessions and dispatches their completions.
pub struct ResourceManager {
	transport: Arc<dyn Transport>,
	config: Arc<RuntimeConfig>,
	sessions: Arc<SessionTable>,
	deliveries_tx: mpsc::UnboundedSender<Delivery>,
	/// Taken by `run()`
	deliveries_rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
	/// Taken by `run()`
	notifications: Mutex<Option<NotificationReceiver>>,
	shutdown: Notify,
}

impl ResourceManager {
	/// Creates a manager over `transport`, which reports on `notifications`.
	///
	/// Nothing is delivered until [`run`](Self::run) is driven.
	pub fn new(transport: Arc<dyn Transport>, notifications: NotificationReceiver, config: RuntimeConfig) -> Arc<Self> {
		let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			transport,
			config: Arc::new(config),
			sessions: Arc::new(DashMap::new()),
			deliveries_tx,
			deliveries_rx: Mutex::new(Some(deliveries_rx)),
			notifications: Mutex::new(Some(notifications)),
			shutdown: Notify::new(),
		})
	}

	/// Creates a manager and spawns its dispatch loop on the current runtime.
	pub fn start(
		transport: Arc<dyn Transport>,
		notifications: NotificationReceiver,
		config: RuntimeConfig,
	) -> (Arc<Self>, JoinHandle<()>) {
		let manager = Self::new(transport, notifications, config);
		let handle = tokio::spawn(Arc::clone(&manager).run());
		(manager, handle)
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	/// Opens a session on `target`.
	pub fn open(&self, target: &str) -> Result<Session> {
		let id = self.transport.open_session(target)?;
		let context = Arc::new(SessionContext::new(
			id,
			target.to_string(),
			Arc::clone(&self.transport),
			self.deliveries_tx.clone(),
			Arc::clone(&self.config),
			Arc::downgrade(&self.sessions),
		));
		self.sessions.insert(id, Arc::clone(&context));
		tracing::debug!(session = %id, resource = target, "Session opened");
		Ok(Session::new(context))
	}

	/// Number of open sessions.
	pub fn session_count(&self) -> usize {
		self.sessions.len()
	}

	/// Closes every open session.
	pub fn close_all(&self) {
		let contexts: Vec<Arc<SessionContext>> = self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect();
		for context in contexts {
			context.close();
		}
	}

	/// Closes every session and stops the dispatch loop.
	pub fn shutdown(&self) {
		self.close_all();
		self.shutdown.notify_one();
	}

	/// Runs the dispatch loop until the transport channel closes or
	/// [`shutdown`](Self::shutdown) is called.
	///
	/// Queued cancellation events are delivered before the next transport
	/// notification is processed.
	///
	/// Only the first call runs; later calls return immediately.
	pub async fn run(self: Arc<Self>) {
		let Some(mut notifications) = self.notifications.lock().take() else {
			tracing::warn!("ResourceManager::run called twice; dispatch loop already taken");
			return;
		};
		let Some(mut deliveries) = self.deliveries_rx.lock().take() else {
			tracing::warn!("ResourceManager::run called twice; delivery queue already taken");
			return;
		};

		tracing::debug!("Dispatch loop started");
		loop {
			tokio::select! {
				biased;
				_ = self.shutdown.notified() => break,
				Some(delivery) = deliveries.recv() => delivery.context.deliver(&delivery.event),
				notification = notifications.recv() => match notification {
					Some(notification) => self.dispatch(notification),
					None => {
						tracing::debug!("Transport notification channel closed");
						break;
					}
				},
			}
		}

		while let Ok(delivery) = deliveries.try_recv() {
			delivery.context.deliver(&delivery.event);
		}
		tracing::debug!("Dispatch loop stopped");
	}

	fn dispatch(&self, notification: TransportNotification) {
		match notification {
			TransportNotification::Io { session, job, outcome } => match self.context(session) {
				Some(context) => context.on_transport_outcome(job, outcome),
				None => tracing::debug!(%session, %job, "Notification for closed or unknown session (ignored)"),
			},
			TransportNotification::ServiceRequest(request) => {
				if !self.config.service_requests {
					tracing::trace!(session = %request.session, "Service requests disabled (ignored)");
					return;
				}
				match self.context(request.session) {
					Some(context) => context.on_service_request(&request),
					None => tracing::debug!(session = %request.session, "Service request for closed or unknown session (ignored)"),
				}
			}
		}
	}

	/// Clones the context out so no table lock is held during delivery.
	fn context(&self, session: SessionId) -> Option<Arc<SessionContext>> {
		self.sessions.get(&session).map(|entry| Arc::clone(entry.value()))
	}
}
