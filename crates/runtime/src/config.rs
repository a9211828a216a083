//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! overrides:
//!
//! ```json
//! { "defaultTimeoutMs": 5000, "readBufferSize": 1024 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default waiting window for [`Session::wait_default`](crate::Session::wait_default).
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default read capacity for reads that do not name one.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
	/// Waiting window applied when a caller does not pass its own.
	pub default_timeout_ms: u64,
	/// Capacity used by [`Session::read_default`](crate::Session::read_default).
	pub read_buffer_size: usize,
	/// Whether service-request notifications are delivered to handlers.
	pub service_requests: bool,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			default_timeout_ms: DEFAULT_TIMEOUT_MS,
			read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
			service_requests: true,
		}
	}
}

impl RuntimeConfig {
	/// Loads and validates a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&content)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads `path` if given, otherwise returns the defaults.
	pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
		match path {
			Some(path) => Self::load(path),
			None => Ok(Self::default()),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.read_buffer_size == 0 {
			return Err(Error::InvalidConfig("readBufferSize must be greater than zero".to_string()));
		}
		Ok(())
	}

	pub fn default_timeout(&self) -> Duration {
		Duration::from_millis(self.default_timeout_ms)
	}
}
