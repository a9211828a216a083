use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("config {path}: {source}")]
	Config {
		path: String,
		#[source]
		source: instr_runtime::Error,
	},

	#[error("timeout after {ms}ms waiting for: {condition}")]
	Timeout { ms: u64, condition: String },

	#[error(transparent)]
	Runtime(#[from] instr_runtime::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		use instr_runtime::Error as RuntimeError;

		match self {
			CliError::InvalidInput(_) => ErrorCode::InvalidInput,
			CliError::Config { .. } => ErrorCode::ConfigError,
			CliError::Timeout { .. } => ErrorCode::Timeout,
			CliError::Runtime(err) => match err {
				RuntimeError::InvalidSession { .. } | RuntimeError::ResourceNotFound(_) => ErrorCode::SessionError,
				RuntimeError::ResourceLocked(_) => ErrorCode::ResourceLocked,
				RuntimeError::AcquireFailed(_) => ErrorCode::AcquireFailed,
				RuntimeError::Timeout(_) => ErrorCode::Timeout,
				RuntimeError::TransportError(_) | RuntimeError::ChannelClosed => ErrorCode::TransportError,
				RuntimeError::InvalidConfig(_) => ErrorCode::ConfigError,
				RuntimeError::NotReady { .. } | RuntimeError::ForeignJob { .. } | RuntimeError::InvalidExpression(_) => {
					ErrorCode::InvalidInput
				}
				RuntimeError::Io(_) | RuntimeError::Json(_) => ErrorCode::InternalError,
			},
			CliError::Json(_) => ErrorCode::InternalError,
		}
	}

	pub fn to_command_error(&self) -> CommandError {
		CommandError {
			code: self.code(),
			message: self.to_string(),
			details: None,
		}
	}
}
