use serde::Serialize;
use serde_json::json;

use super::Outcome;
use crate::bench::Bench;
use crate::error::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundResource {
	pub resource: String,
	pub session: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReport {
	pub expression: String,
	pub count: usize,
	pub resources: Vec<FoundResource>,
}

/// Finds the resources matching `expression` and opens a session to each.
pub fn list(bench: &Bench, expression: &str) -> Result<Outcome<ListReport>> {
	let inputs = json!({ "expression": expression });
	let names = bench.sim.find_resources(expression)?;

	let mut resources = Vec::with_capacity(names.len());
	for name in names {
		let session = bench.open(&name)?;
		resources.push(FoundResource {
			session: session.id().to_string(),
			resource: name,
		});
		session.close();
	}

	let report = ListReport {
		expression: expression.to_string(),
		count: resources.len(),
		resources,
	};
	let outcome = Outcome::new(inputs, report);
	if outcome.data.count == 0 {
		return Ok(outcome.warn(format!("no resources match {expression}")));
	}
	Ok(outcome)
}
