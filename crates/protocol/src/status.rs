//! Job status and transport error kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// VISA-style completion status codes reported by instrument transports.
///
/// Status codes are signed 32-bit values; failures have the sign bit set.
pub mod codes {
	pub const VI_SUCCESS: i32 = 0;
	pub const VI_ERROR_TMO: i32 = 0xBFFF_0015_u32 as i32;
	pub const VI_ERROR_IO: i32 = 0xBFFF_003E_u32 as i32;
	pub const VI_ERROR_NLISTENERS: i32 = 0xBFFF_005F_u32 as i32;
	pub const VI_ERROR_ABORT: i32 = 0xBFFF_0072_u32 as i32;
}

/// Why a job failed, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
	/// The transport gave up waiting for the device.
	TransportTimeout,
	/// The device or bus reported an I/O fault.
	DeviceError,
	/// The operation was aborted on the transport side.
	Aborted,
	/// A transport-specific status code with no mapped meaning.
	Unknown(i32),
}

impl ErrorKind {
	/// Maps a transport status code to an error kind.
	pub fn from_status(code: i32) -> Self {
		match code {
			codes::VI_ERROR_TMO => ErrorKind::TransportTimeout,
			codes::VI_ERROR_ABORT => ErrorKind::Aborted,
			codes::VI_ERROR_IO | codes::VI_ERROR_NLISTENERS => ErrorKind::DeviceError,
			other => ErrorKind::Unknown(other),
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ErrorKind::TransportTimeout => f.write_str("transport timeout"),
			ErrorKind::DeviceError => f.write_str("device error"),
			ErrorKind::Aborted => f.write_str("aborted"),
			ErrorKind::Unknown(code) => write!(f, "unknown status 0x{:08X}", *code as u32),
		}
	}
}

/// Lifecycle state of an asynchronous job.
///
/// Transitions are monotonic: `Pending` moves to exactly one terminal state,
/// which is never replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum JobStatus {
	#[default]
	Pending,
	/// Finished successfully, transferring this many bytes.
	Completed(usize),
	Failed(ErrorKind),
	Cancelled,
}

impl JobStatus {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, JobStatus::Pending)
	}

	/// Transferred byte count, if the job completed.
	pub fn byte_count(&self) -> Option<usize> {
		match self {
			JobStatus::Completed(count) => Some(*count),
			_ => None,
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			JobStatus::Pending => f.write_str("pending"),
			JobStatus::Completed(count) => write!(f, "completed ({count} bytes)"),
			JobStatus::Failed(kind) => write!(f, "failed: {kind}"),
			JobStatus::Cancelled => f.write_str("cancelled"),
		}
	}
}
