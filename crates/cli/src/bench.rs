//! Simulated test bench the commands run against.
//!
//! Every command builds a fresh bench: a [`SimTransport`] with the demo
//! instruments registered, a [`ResourceManager`] with its dispatch loop
//! running, and the effective [`RuntimeConfig`].

use std::path::Path;
use std::sync::Arc;

use instr_runtime::{ResourceManager, RuntimeConfig, Session, SimTransport, TransportCall};
use tokio::task::JoinHandle;

use crate::error::{CliError, Result};

/// Instruments the simulated backplane knows about.
pub const KNOWN_RESOURCES: &[&str] = &["GPIB0::2::INSTR", "GPIB0::5::INSTR", "PXI0::14::INSTR", "PXI0::15::INSTR"];

/// Loads the config file, if any, and applies CLI overrides on top.
pub fn resolve_config(path: Option<&Path>, timeout_ms: Option<u64>) -> Result<RuntimeConfig> {
	let mut config = RuntimeConfig::load_or_default(path).map_err(|source| CliError::Config {
		path: path.map(|p| p.display().to_string()).unwrap_or_default(),
		source,
	})?;
	if let Some(ms) = timeout_ms {
		config.default_timeout_ms = ms;
	}
	tracing::debug!(?config, "Runtime config resolved");
	Ok(config)
}

pub struct Bench {
	pub sim: SimTransport,
	pub manager: Arc<ResourceManager>,
	dispatch: JoinHandle<()>,
}

impl Bench {
	pub fn start(config: RuntimeConfig) -> Self {
		let (sim, notifications) = SimTransport::new();
		for resource in KNOWN_RESOURCES {
			sim.add_resource(resource);
		}
		let (manager, dispatch) = ResourceManager::start(Arc::new(sim.clone()), notifications, config);
		Self { sim, manager, dispatch }
	}

	pub fn open(&self, resource: &str) -> Result<Session> {
		Ok(self.manager.open(resource)?)
	}

	/// Guard-related transport calls so far, rendered for output.
	pub fn guard_log(&self) -> Vec<String> {
		self.sim.guard_calls().iter().map(describe_call).collect()
	}

	/// Closes every session and waits for the dispatch loop to stop.
	pub async fn shutdown(self) {
		self.manager.shutdown();
		if let Err(err) = self.dispatch.await {
			tracing::error!("Dispatch loop ended abnormally: {}", err);
		}
	}
}

pub fn describe_call(call: &TransportCall) -> String {
	match call {
		TransportCall::OpenSession { target } => format!("open {target}"),
		TransportCall::CloseSession { session } => format!("close {session}"),
		TransportCall::Begin { session, job, kind } => format!("begin {kind} {job} on {session}"),
		TransportCall::Abort { handle } => format!("abort {handle}"),
		TransportCall::AcquireResource { session, resource } => format!("reserve {resource} ({session})"),
		TransportCall::ReleaseResource { session, resource } => format!("unreserve {resource} ({session})"),
		TransportCall::MapRoute { session, route } => format!("map {route} ({session})"),
		TransportCall::UnmapRoute { session, route } => format!("unmap {route} ({session})"),
		TransportCall::Lock { session, kind } => format!("{kind} ({session})"),
		TransportCall::Unlock { session } => format!("unlock ({session})"),
	}
}
