//! Trigger reservation, routing, and locking demos.
//!
//! Each demo reports the guard-related transport calls it caused, which is
//! the observable proof that nothing was released without being acquired.

use instr_protocol::{LockKind, RouteSpec, TriggerResource};
use instr_runtime::{GuardState, Pairing, ScopedGuard};
use serde::Serialize;
use serde_json::json;

use super::Outcome;
use crate::bench::Bench;
use crate::error::Result;

/// Chassis controller session used for backplane operations.
const CHASSIS: &str = "PXI0::14::INSTR";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardReport {
	pub steps: Vec<GuardStep>,
	/// Guard calls issued on the transport, in order
	pub calls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStep {
	pub resource: String,
	pub state: &'static str,
	pub released: bool,
}

fn state_name(state: GuardState) -> &'static str {
	match state {
		GuardState::Acquired => "acquired",
		GuardState::Released => "released",
		GuardState::AcquireFailed => "acquireFailed",
	}
}

/// Records the acquire outcome of `guard`, then releases it.
fn settle<P: Pairing>(guard: ScopedGuard<P>) -> GuardStep {
	let state = state_name(guard.state());
	let released = guard.release();
	GuardStep {
		resource: guard.resource().to_string(),
		state,
		released,
	}
}

pub fn reserve(bench: &Bench, line: i16, bus: u16, busy: bool) -> Result<Outcome<GuardReport>> {
	let inputs = json!({ "line": line, "bus": bus, "busy": busy });
	let resource = TriggerResource::new(line, bus);
	if busy {
		bench.sim.set_busy(resource);
	}

	let session = bench.open(CHASSIS)?;
	let reservation = session.reserve_trigger(resource)?;
	let refused = !reservation.is_acquired();
	let step = settle(reservation);
	session.close();

	let outcome = Outcome::new(inputs, GuardReport {
		steps: vec![step],
		calls: bench.guard_log(),
	});
	Ok(if refused {
		outcome.warn(format!("{resource} is held by another driver; nothing was released"))
	} else {
		outcome
	})
}

pub fn route(bench: &Bench, line: i16, source: u16, destination: u16, refuse: bool) -> Result<Outcome<GuardReport>> {
	let inputs = json!({ "line": line, "source": source, "destination": destination, "refuse": refuse });
	let resource = TriggerResource::new(line, source);
	let spec = RouteSpec::new(line, source, destination);
	if refuse {
		bench.sim.refuse_route(spec);
	}

	let session = bench.open(CHASSIS)?;
	let reservation = session.reserve_trigger(resource)?;
	let mut steps = Vec::new();
	let mut warnings = Vec::new();

	if reservation.is_acquired() {
		let mapping = session.map_trigger(spec)?;
		if !mapping.is_acquired() {
			warnings.push(format!("{spec} refused; no unmap issued"));
		}
		// Tear down in reverse: unmap before unreserving.
		let mapped = settle(mapping);
		steps.push(settle(reservation));
		steps.insert(0, mapped);
	} else {
		warnings.push(format!("{resource} unavailable; route not attempted"));
		steps.push(settle(reservation));
	}
	session.close();

	let mut outcome = Outcome::new(inputs, GuardReport {
		steps,
		calls: bench.guard_log(),
	});
	for warning in warnings {
		outcome = outcome.warn(warning);
	}
	Ok(outcome)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReport {
	pub owner: GuardStep,
	/// A second session's attempt while the lock was held
	pub contender: GuardStep,
	/// Whether the second session could start a read while locked out
	pub contender_could_read: bool,
	pub calls: Vec<String>,
}

pub fn lock(bench: &Bench, resource: &str, shared: bool) -> Result<Outcome<LockReport>> {
	let inputs = json!({ "resource": resource, "shared": shared });
	let kind = if shared { LockKind::Shared } else { LockKind::Exclusive };
	let owner = bench.open(resource)?;
	let contender = bench.open(resource)?;

	let held = owner.lock(kind)?.require()?;
	let attempt = contender.lock(kind)?;
	let contender_could_read = match contender.read_async(16) {
		Ok(job) => {
			contender.cancel(&job)?;
			true
		}
		Err(err) => {
			tracing::info!("Contender read refused: {}", err);
			false
		}
	};

	let contender_step = settle(attempt);
	let owner_step = settle(held);
	owner.close();
	contender.close();

	Ok(Outcome::new(inputs, LockReport {
		owner: owner_step,
		contender: contender_step,
		contender_could_read,
		calls: bench.guard_log(),
	}))
}
