//! Transport abstraction over the instrument I/O layer.
//!
//! A [`Transport`] starts operations and claims hardware synchronously, and
//! reports operation endings and service requests later, out of band, as
//! [`TransportNotification`]s on the channel returned alongside it. The
//! [`ResourceManager`](crate::ResourceManager) owns the receiving end and
//! correlates each notification with the job that started it.
//!
//! All calls must return promptly. A transport never invokes runtime code
//! from inside a call; completions travel only through the channel.

mod sim;


pub use sim::{SimTransport, TransportCall};

use instr_protocol::{
	JobId, LockKind, Operation, RouteSpec, SessionId, TransportHandle, TransportNotification, TriggerResource,
};
use regex::Regex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Sending half of a transport notification channel.
pub type NotificationSender = mpsc::UnboundedSender<TransportNotification>;

/// Receiving half, consumed by [`ResourceManager::run`](crate::ResourceManager::run).
pub type NotificationReceiver = mpsc::UnboundedReceiver<TransportNotification>;

/// Creates a notification channel for a transport implementation.
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
	mpsc::unbounded_channel()
}

/// Compiles a VISA-style resource expression into an anchored, case-insensitive regex.
///
/// `?` becomes any character; `*`, `+`, `|`, parentheses and `[...]` classes
/// pass through; everything else is literal.
pub fn resource_expression(expression: &str) -> Result<Regex> {
	let mut pattern = String::from("(?i)^(?:");
	let mut in_class = false;
	for ch in expression.chars() {
		match ch {
			'[' if !in_class => {
				in_class = true;
				pattern.push(ch);
			}
			']' if in_class => {
				in_class = false;
				pattern.push(ch);
			}
			_ if in_class => pattern.push(ch),
			'?' => pattern.push('.'),
			'*' | '+' | '|' | '(' | ')' => pattern.push(ch),
			_ => pattern.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
		}
	}
	pattern.push_str(")$");
	Regex::new(&pattern).map_err(|err| Error::InvalidExpression(format!("{expression}: {err}")))
}

/// Instrument transport and resource-manager collaborator.
pub trait Transport: Send + Sync {
	/// Opens a session to `target`, failing with `ResourceNotFound` for unknown resources.
	fn open_session(&self, target: &str) -> Result<SessionId>;

	/// Closes a session. In-flight operations of the session are dropped without notification.
	fn close_session(&self, session: SessionId);

	/// Starts `operation` and returns immediately.
	///
	/// The ending is reported as [`TransportNotification::Io`] tagged with `job`.
	fn begin(&self, session: SessionId, job: JobId, operation: &Operation) -> Result<TransportHandle>;

	/// Requests an abort. Best effort: the operation may still complete normally.
	fn abort(&self, handle: TransportHandle);

	/// Attempts to reserve a trigger line. Returns false if the hardware refused.
	fn acquire_resource(&self, session: SessionId, resource: &TriggerResource) -> bool;

	fn release_resource(&self, session: SessionId, resource: &TriggerResource);

	/// Attempts to map a trigger route. Returns false if the hardware refused.
	fn map_route(&self, session: SessionId, route: &RouteSpec) -> bool;

	fn unmap_route(&self, session: SessionId, route: &RouteSpec);

	/// Attempts to lock the session's resource. Returns false if another session holds it.
	fn lock(&self, session: SessionId, kind: LockKind) -> bool;

	fn unlock(&self, session: SessionId);
}
