//! Runs the `instr` binary and checks the JSON envelopes it prints.

use std::process::Command;

use serde_json::Value;

fn run(args: &[&str]) -> (Value, bool) {
	let output = Command::new(env!("CARGO_BIN_EXE_instr"))
		.args(["-f", "ndjson"])
		.args(args)
		.output()
		.expect("failed to execute instr");

	let stdout = String::from_utf8_lossy(&output.stdout);
	let parsed = serde_json::from_str::<Value>(stdout.trim())
		.unwrap_or_else(|e| panic!("stdout is not a JSON envelope ({e}): {stdout}"));
	(parsed, output.status.success())
}

#[test]
fn read_completes_with_reply_bytes() {
	let (json, success) = run(&["read", "--reply", "+2.50000E-03\n", "--delay-ms", "5"]);
	assert!(success);
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "read");
	assert_eq!(json["data"]["polled"]["state"], "pending");
	assert_eq!(json["data"]["status"]["state"], "completed");
	assert_eq!(json["data"]["status"]["detail"], 13);
	assert_eq!(json["data"]["events"].as_array().map(Vec::len), Some(1));
}

#[test]
fn cancelled_read_reports_cancelled() {
	let (json, success) = run(&["read", "--cancel", "--delay-ms", "500"]);
	assert!(success);
	assert_eq!(json["data"]["status"]["state"], "cancelled");
	assert_eq!(json["data"]["events"][0]["status"]["state"], "cancelled");
}

#[test]
fn unknown_resource_is_session_error() {
	let (json, success) = run(&["read", "ASRL9::INSTR"]);
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "SESSION_ERROR");
}

#[test]
fn busy_trigger_reports_single_call() {
	let (json, success) = run(&["reserve", "--line", "0", "--bus", "1", "--busy"]);
	assert!(success);
	assert_eq!(json["data"]["steps"][0]["state"], "acquireFailed");
	assert_eq!(json["data"]["calls"].as_array().map(Vec::len), Some(1));
	assert_eq!(json["diagnostics"][0]["level"], "warning");
}

#[test]
fn srq_times_out_with_short_window() {
	let (json, success) = run(&["srq", "--delay-ms", "1000", "--timeout-ms", "50"]);
	assert!(!success);
	assert_eq!(json["error"]["code"], "TIMEOUT");
}

#[test]
fn invalid_config_file_is_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("instr.json");
	std::fs::write(&path, r#"{ "readBufferSize": 0 }"#).unwrap();

	let (json, success) = run(&["read", "--config", path.to_str().unwrap()]);
	assert!(!success);
	assert_eq!(json["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn list_finds_gpib_instruments() {
	let (json, success) = run(&["list", "GPIB?*INSTR"]);
	assert!(success);
	assert_eq!(json["command"], "list");
	assert_eq!(json["data"]["count"], 2);
	assert_eq!(json["data"]["resources"][1]["resource"], "GPIB0::5::INSTR");
}
