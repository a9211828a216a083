//! Asynchronous read and write demos.

use std::time::Duration;

use instr_protocol::{CompletionEvent, JobStatus};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::Outcome;
use crate::bench::Bench;
use crate::error::{CliError, Result};

pub struct ReadArgs {
	pub resource: String,
	pub bytes: Option<usize>,
	pub reply: String,
	pub delay_ms: u64,
	pub cancel: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
	pub resource: String,
	pub job: String,
	/// Status seen by the first poll, right after submission
	pub polled: JobStatus,
	pub status: JobStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reply: Option<String>,
	/// Events the completion handler received
	pub events: Vec<EventReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
	pub job: String,
	pub status: JobStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub byte_count: Option<usize>,
}

impl From<&CompletionEvent> for EventReport {
	fn from(event: &CompletionEvent) -> Self {
		Self {
			job: event.job.to_string(),
			status: event.status,
			byte_count: event.byte_count,
		}
	}
}

type EventLog = mpsc::UnboundedReceiver<EventReport>;

fn record_events(session: &instr_runtime::Session) -> Result<EventLog> {
	let (tx, rx) = mpsc::unbounded_channel();
	session.on_completion(move |event: &CompletionEvent| {
		let _ = tx.send(EventReport::from(event));
	})?;
	Ok(rx)
}

/// Waits for the handler's event for a settled job, then collects any others.
async fn collect_events(log: &mut EventLog, window: Duration) -> Vec<EventReport> {
	let mut events = Vec::new();
	match tokio::time::timeout(window, log.recv()).await {
		Ok(Some(event)) => events.push(event),
		Ok(None) => return events,
		Err(_) => tracing::warn!("Completion handler did not report within {}ms", window.as_millis()),
	}
	while let Ok(event) = log.try_recv() {
		events.push(event);
	}
	events
}

pub async fn read(bench: &Bench, args: ReadArgs) -> Result<Outcome<JobReport>> {
	let timeout = bench.manager.config().default_timeout();
	let capacity = args.bytes.unwrap_or(bench.manager.config().read_buffer_size);
	if capacity == 0 {
		return Err(CliError::InvalidInput("--bytes must be greater than zero".into()));
	}
	let inputs = json!({
		"resource": args.resource,
		"bytes": capacity,
		"delayMs": args.delay_ms,
		"cancel": args.cancel,
	});

	bench
		.sim
		.respond_with(&args.resource, args.reply.into_bytes(), Duration::from_millis(args.delay_ms));
	let session = bench.open(&args.resource)?;
	let mut log = record_events(&session)?;

	let job = session.read_async(capacity)?;
	let polled = match session.result_of(&job) {
		Ok(status) => status,
		Err(err) if err.is_not_ready() => JobStatus::Pending,
		Err(err) => return Err(err.into()),
	};

	let mut warnings = Vec::new();
	let status = if args.cancel {
		let outcome = session.cancel(&job)?;
		if !outcome.was_cancelled() {
			warnings.push(format!("{} settled before it could be cancelled", job.id()));
		}
		job.status()
	} else {
		match session.wait(&job, timeout).await {
			Ok(status) => status,
			Err(err) if err.is_timeout() => {
				session.cancel(&job)?;
				warnings.push(format!("no reply within {}ms, read cancelled", timeout.as_millis()));
				job.status()
			}
			Err(err) => return Err(err.into()),
		}
	};

	let events = collect_events(&mut log, timeout).await;
	session.close();

	let reply = job.take_data().map(|data| String::from_utf8_lossy(&data).into_owned());
	if job.status().byte_count() == Some(capacity) {
		warnings.push(format!("reply filled the {capacity}-byte buffer and may be truncated"));
	}

	let report = JobReport {
		resource: args.resource,
		job: job.id().to_string(),
		polled,
		status,
		reply,
		events,
	};
	let mut outcome = Outcome::new(inputs, report);
	for warning in warnings {
		outcome = outcome.warn(warning);
	}
	Ok(outcome)
}

pub async fn write(bench: &Bench, resource: &str, data: String, delay_ms: u64) -> Result<Outcome<JobReport>> {
	let timeout = bench.manager.config().default_timeout();
	let inputs = json!({ "resource": resource, "bytes": data.len(), "delayMs": delay_ms });

	bench.sim.respond_with(resource, Vec::new(), Duration::from_millis(delay_ms));
	let session = bench.open(resource)?;
	let mut log = record_events(&session)?;

	let job = session.write_async(data.into_bytes())?;
	let polled = job.status();
	let status = match session.wait(&job, timeout).await {
		Ok(status) => status,
		Err(err) if err.is_timeout() => {
			session.cancel(&job)?;
			return Err(CliError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("write to {resource}"),
			});
		}
		Err(err) => return Err(err.into()),
	};

	let events = collect_events(&mut log, timeout).await;
	session.close();

	Ok(Outcome::new(inputs, JobReport {
		resource: resource.to_string(),
		job: job.id().to_string(),
		polled,
		status,
		reply: None,
		events,
	}))
}
