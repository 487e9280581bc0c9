//! Terminal implementation of `ProgressReporter`.
//!
//! Wraps `&OutputContext` and implements the `application::ports::ProgressReporter`
//! trait so the provisioner can emit progress events and relay automation output
//! without depending on any presentation type directly.

use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter that wraps an `OutputContext`.
///
/// - `step()` prints `"  → {message}"`
/// - `success()` prints `"  ✓ {message}"`
/// - `warn()` prints `"  ! {message}"`
/// - `output()` prints `"    │ {line}"`
///
/// Everything is suppressed when `ctx.quiet`.
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
}

impl<'a> TerminalReporter<'a> {
    /// Create a new `TerminalReporter` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    fn emit(&self, line: String) {
        if !self.ctx.quiet {
            println!("{line}");
        }
    }

    #[must_use]
    pub fn format_step(&self, message: &str) -> String {
        format!("  {} {message}", "→".style(self.ctx.styles.step))
    }

    #[must_use]
    pub fn format_success(&self, message: &str) -> String {
        format!("  {} {message}", "✓".style(self.ctx.styles.success))
    }

    #[must_use]
    pub fn format_warn(&self, message: &str) -> String {
        format!("  {} {message}", "!".style(self.ctx.styles.warning))
    }

    #[must_use]
    pub fn format_output(&self, line: &str) -> String {
        format!("    {} {line}", "│".style(self.ctx.styles.dim))
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        self.emit(self.format_step(message));
    }

    fn success(&self, message: &str) {
        self.emit(self.format_success(message));
    }

    fn warn(&self, message: &str) {
        self.emit(self.format_warn(message));
    }

    fn output(&self, line: &str) {
        self.emit(self.format_output(line));
    }
}
