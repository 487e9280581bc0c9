//! Diagnostic logging for the CLI binary.
//!
//! Events go to stderr so stdout stays reserved for progress output and
//! relayed automation output. `RUST_LOG` overrides the verbosity flags.

use tracing_subscriber::EnvFilter;

/// Filter directives for a `-v` count.
///
/// russh internals stay at `warn` unless `RUST_LOG` says otherwise.
#[must_use]
pub fn directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    format!("{level},russh=warn")
}

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
