//! Help output colors.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};

/// Green bold headings, cyan literals and placeholders.
pub fn cli_styles() -> Styles {
	let heading = AnsiColor::Green.on_default().effects(Effects::BOLD);
	let emphasis = AnsiColor::Cyan.on_default();
	Styles::styled()
		.header(heading)
		.usage(heading)
		.literal(emphasis)
		.placeholder(emphasis)
		.valid(emphasis)
		.invalid(AnsiColor::Yellow.on_default())
}
