use std::time::Duration;

use instr_protocol::ServiceRequest;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::Outcome;
use crate::bench::Bench;
use crate::error::{CliError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SrqReport {
	pub resource: String,
	pub session: String,
	pub status_byte: u8,
	/// Bit 6 of the status byte (RQS)
	pub requesting_service: bool,
	pub waited_ms: u64,
}

/// Installs a service-request handler, has the simulated device assert SRQ
/// after `delay_ms`, and reports what the handler saw.
pub async fn wait_for_srq(bench: &Bench, resource: &str, status_byte: u8, delay_ms: u64) -> Result<Outcome<SrqReport>> {
	let timeout = bench.manager.config().default_timeout();
	let inputs = json!({ "resource": resource, "statusByte": status_byte, "delayMs": delay_ms });

	let session = bench.open(resource)?;
	let (tx, mut rx) = mpsc::unbounded_channel();
	session.on_service_request(move |request: &ServiceRequest| {
		let _ = tx.send(*request);
	})?;

	let sim = bench.sim.clone();
	let session_id = session.id();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(delay_ms)).await;
		sim.raise_srq(session_id, status_byte);
	});

	let started = tokio::time::Instant::now();
	let received = tokio::time::timeout(timeout, rx.recv()).await;
	session.clear_service_request_handler();
	session.close();

	let request = match received {
		Ok(Some(request)) => request,
		Ok(None) => return Err(CliError::Runtime(instr_runtime::Error::ChannelClosed)),
		Err(_) => {
			return Err(CliError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("service request from {resource}"),
			});
		}
	};

	Ok(Outcome::new(inputs, SrqReport {
		resource: resource.to_string(),
		session: request.session.to_string(),
		status_byte: request.status_byte,
		requesting_service: request.status_byte & 0x40 != 0,
		waited_ms: started.elapsed().as_millis() as u64,
	}))
}

#[cfg(test)]
mod tests {
	use instr_runtime::RuntimeConfig;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn handler_sees_status_byte() {
		let bench = Bench::start(RuntimeConfig::default());
		let outcome = wait_for_srq(&bench, "PXI0::14::INSTR", 0x41, 100).await.unwrap();

		assert_eq!(outcome.data.status_byte, 0x41);
		assert!(outcome.data.requesting_service);
		assert!(outcome.data.waited_ms >= 100);
		bench.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn disabled_service_requests_time_out() {
		let config = RuntimeConfig {
			service_requests: false,
			default_timeout_ms: 200,
			..RuntimeConfig::default()
		};
		let bench = Bench::start(config);
		let err = wait_for_srq(&bench, "GPIB0::2::INSTR", 0x40, 10).await.unwrap_err();

		assert!(matches!(err, CliError::Timeout { ms: 200, .. }));
		bench.shutdown().await;
	}
}
