//! Identity and operation types.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
	($(#[$meta:meta])* $name:ident, $prefix:literal) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub u64);

		impl $name {
			/// Returns the raw numeric value.
			pub fn get(self) -> u64 {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, concat!($prefix, "#{}"), self.0)
			}
		}
	};
}

id_type!(
	/// Transport-assigned identity of an open device session.
	SessionId,
	"session"
);

id_type!(
	/// Registry-assigned identity of an asynchronous job.
	JobId,
	"job"
);

id_type!(
	/// Transport-side handle of an in-flight operation, used for aborts.
	TransportHandle,
	"op"
);

/// Direction of an asynchronous I/O job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
	Read,
	Write,
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OperationKind::Read => f.write_str("read"),
			OperationKind::Write => f.write_str("write"),
		}
	}
}

/// An asynchronous operation handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
	/// Read up to `capacity` bytes from the device.
	Read { capacity: usize },
	/// Write `payload` to the device.
	Write { payload: Vec<u8> },
}

impl Operation {
	pub fn read(capacity: usize) -> Self {
		Operation::Read { capacity }
	}

	pub fn write(payload: impl Into<Vec<u8>>) -> Self {
		Operation::Write {
			payload: payload.into(),
		}
	}

	pub fn kind(&self) -> OperationKind {
		match self {
			Operation::Read { .. } => OperationKind::Read,
			Operation::Write { .. } => OperationKind::Write,
		}
	}

	/// Buffer capacity of the job. For writes this is the payload length.
	pub fn capacity(&self) -> usize {
		match self {
			Operation::Read { capacity } => *capacity,
			Operation::Write { payload } => payload.len(),
		}
	}
}

/// A backplane trigger line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerLine(pub i16);

/// A segment of a segmented trigger bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusSegment(pub u16);

/// Identity of a reservable trigger resource: one line on one bus segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResource {
	pub line: TriggerLine,
	pub bus: BusSegment,
}

impl TriggerResource {
	pub fn new(line: i16, bus: u16) -> Self {
		Self {
			line: TriggerLine(line),
			bus: BusSegment(bus),
		}
	}
}

impl fmt::Display for TriggerResource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "trigger {} on bus {}", self.line.0, self.bus.0)
	}
}

/// A trigger route: `line` driven from `source` segment onto `destination` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
	pub line: TriggerLine,
	pub source: BusSegment,
	pub destination: BusSegment,
}

impl RouteSpec {
	pub fn new(line: i16, source: u16, destination: u16) -> Self {
		Self {
			line: TriggerLine(line),
			source: BusSegment(source),
			destination: BusSegment(destination),
		}
	}
}

impl fmt::Display for RouteSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"trigger {} from bus {} to bus {}",
			self.line.0, self.source.0, self.destination.0
		)
	}
}

/// Session lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
	/// No other session may access the resource.
	#[default]
	Exclusive,
	/// Other sessions holding the shared lock may access the resource.
	Shared,
}

impl fmt::Display for LockKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LockKind::Exclusive => f.write_str("exclusive lock"),
			LockKind::Shared => f.write_str("shared lock"),
		}
	}
}
