mod guard;
mod io;
mod list;
mod srq;

use serde::Serialize;

use crate::bench::{Bench, resolve_config};
use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_result};

/// What a command produced: its inputs, data, and any warnings to surface.
#[derive(Debug)]
pub struct Outcome<T: Serialize> {
	pub inputs: serde_json::Value,
	pub data: T,
	pub warnings: Vec<String>,
}

impl<T: Serialize> Outcome<T> {
	pub fn new(inputs: serde_json::Value, data: T) -> Self {
		Self {
			inputs,
			data,
			warnings: Vec::new(),
		}
	}

	pub fn warn(mut self, message: impl Into<String>) -> Self {
		self.warnings.push(message.into());
		self
	}
}

pub async fn dispatch(cli: Cli, format: OutputFormat) -> Result<()> {
	let config = resolve_config(cli.config.as_deref(), cli.timeout_ms)?;
	let name = cli.command.name();
	let bench = Bench::start(config);

	let result = match cli.command {
		Commands::Read {
			resource,
			bytes,
			reply,
			delay_ms,
			cancel,
		} => io::read(&bench, io::ReadArgs {
			resource,
			bytes,
			reply,
			delay_ms,
			cancel,
		})
		.await
		.map(|out| emit(name, out, format)),
		Commands::Write { resource, data, delay_ms } => {
			io::write(&bench, &resource, data, delay_ms).await.map(|out| emit(name, out, format))
		}
		Commands::Srq {
			resource,
			status_byte,
			delay_ms,
		} => srq::wait_for_srq(&bench, &resource, status_byte, delay_ms)
			.await
			.map(|out| emit(name, out, format)),
		Commands::Reserve { line, bus, busy } => guard::reserve(&bench, line, bus, busy).map(|out| emit(name, out, format)),
		Commands::Route {
			line,
			source,
			destination,
			refuse,
		} => guard::route(&bench, line, source, destination, refuse).map(|out| emit(name, out, format)),
		Commands::Lock { resource, shared } => guard::lock(&bench, &resource, shared).map(|out| emit(name, out, format)),
		Commands::List { expression } => list::list(&bench, &expression).map(|out| emit(name, out, format)),
	};

	bench.shutdown().await;
	result
}

fn emit<T: Serialize>(command: &str, outcome: Outcome<T>, format: OutputFormat) {
	let mut builder = ResultBuilder::new(command).inputs(outcome.inputs).data(outcome.data);
	for warning in outcome.warnings {
		builder = builder.diagnostic(crate::output::DiagnosticLevel::Warning, warning);
	}
	print_result(&builder.build(), format);
}
