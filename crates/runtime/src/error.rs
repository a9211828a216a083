//! Error types for the instrument runtime.
//!
//! Only submission-time failures surface here. A job that fails after it was
//! submitted reports [`JobStatus::Failed`](instr_protocol::JobStatus::Failed)
//! through its status and completion event instead.

use instr_protocol::{JobId, SessionId};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the instrument runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Operation issued against a closed or unknown session.
	#[error("Invalid session: {session} is closed or unknown")]
	InvalidSession { session: SessionId },

	/// Result queried before the job reached a terminal state.
	#[error("Not ready: {job} is still pending")]
	NotReady { job: JobId },

	/// Job handle passed to a session that does not own it.
	#[error("Job {job} does not belong to {session}")]
	ForeignJob { job: JobId, session: SessionId },

	/// The transport does not know the requested resource.
	#[error("Resource not found: {0}")]
	ResourceNotFound(String),

	/// Another session holds a lock on the resource.
	#[error("Resource locked by another session: {0}")]
	ResourceLocked(String),

	/// A scoped guard could not claim its hardware resource.
	#[error("Acquire failed: {0}")]
	AcquireFailed(String),

	/// Timeout waiting for a job to settle.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Transport-level failure reported synchronously.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Resource expression that does not compile.
	#[error("Invalid resource expression: {0}")]
	InvalidExpression(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Configuration rejected during load.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if the job is still pending.
	pub fn is_not_ready(&self) -> bool {
		matches!(self, Error::NotReady { .. })
	}

	/// Returns true if the session was closed or never opened.
	pub fn is_invalid_session(&self) -> bool {
		matches!(self, Error::InvalidSession { .. })
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if a guard failed to acquire its resource.
	pub fn is_acquire_failed(&self) -> bool {
		matches!(self, Error::AcquireFailed(_))
	}
}
