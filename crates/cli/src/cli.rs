use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "instr")]
#[command(about = "Drive asynchronous instrument sessions against a simulated backplane")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: toon (default), json, ndjson, or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "toon")]
	pub format: OutputFormat,

	/// Runtime config file (JSON)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Wait window in milliseconds, overriding the config file
	#[arg(long, global = true, value_name = "MS")]
	pub timeout_ms: Option<u64>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Submit an asynchronous read and wait for it to settle
	Read {
		/// Resource name to open
		#[arg(default_value = "GPIB0::2::INSTR")]
		resource: String,

		/// Read capacity in bytes (defaults to the configured buffer size)
		#[arg(long)]
		bytes: Option<usize>,

		/// Reply the simulated instrument sends
		#[arg(long, default_value = "+1.23456789E+00\n")]
		reply: String,

		/// Delay before the instrument replies
		#[arg(long, default_value_t = 50)]
		delay_ms: u64,

		/// Cancel the read instead of waiting for it
		#[arg(long)]
		cancel: bool,
	},

	/// Submit an asynchronous write and wait for it to settle
	Write {
		/// Resource name to open
		#[arg(default_value = "GPIB0::2::INSTR")]
		resource: String,

		/// Payload to send
		#[arg(long, default_value = "*IDN?\n")]
		data: String,

		#[arg(long, default_value_t = 10)]
		delay_ms: u64,
	},

	/// Install a service-request handler and wait for the device to assert SRQ
	Srq {
		#[arg(default_value = "GPIB0::2::INSTR")]
		resource: String,

		/// Status byte the simulated device reports
		#[arg(long, default_value_t = 0x40)]
		status_byte: u8,

		/// Delay before the device asserts SRQ
		#[arg(long, default_value_t = 100)]
		delay_ms: u64,
	},

	/// Reserve a backplane trigger line, then release it
	Reserve {
		#[arg(long, default_value_t = 0)]
		line: i16,

		#[arg(long, default_value_t = 1)]
		bus: u16,

		/// Mark the line as held by another driver
		#[arg(long)]
		busy: bool,
	},

	/// Reserve a trigger line, route it between bus segments, then tear both down
	Route {
		#[arg(long, default_value_t = 0)]
		line: i16,

		#[arg(long, default_value_t = 1)]
		source: u16,

		#[arg(long, default_value_t = 3)]
		destination: u16,

		/// Make the backplane refuse the route
		#[arg(long)]
		refuse: bool,
	},

	/// Lock a resource and show a second session being locked out
	Lock {
		#[arg(default_value = "GPIB0::2::INSTR")]
		resource: String,

		/// Take a shared lock instead of an exclusive one
		#[arg(long)]
		shared: bool,
	},

	/// Find resources matching an expression and open each one
	List {
		/// VISA-style expression (`?` any character, `*` repeat, `[0-9]` class)
		#[arg(default_value = "?*INSTR")]
		expression: String,
	},
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Read { .. } => "read",
			Commands::Write { .. } => "write",
			Commands::Srq { .. } => "srq",
			Commands::Reserve { .. } => "reserve",
			Commands::Route { .. } => "route",
			Commands::Lock { .. } => "lock",
			Commands::List { .. } => "list",
		}
	}
}
