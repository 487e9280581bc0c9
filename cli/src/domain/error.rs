//! Configuration and provisioning errors.
//!
//! OS causes hang off `#[source]` and are not repeated in the message, so
//! `{:#}` shows each one once.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ── Config errors ─────────────────────────────────────────────────────────────

/// A single rejected configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProblem {
    /// Configuration key the problem refers to.
    pub field: String,
    /// Human-readable reason, phrased so the user can act on it.
    pub reason: String,
}

impl ConfigProblem {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Errors raised while validating the provisioner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provisioner configuration:\n{}", format_problems(.problems))]
    Invalid { problems: Vec<ConfigProblem> },
}

impl ConfigError {
    /// All problems found, in field declaration order.
    #[must_use]
    pub fn problems(&self) -> &[ConfigProblem] {
        match self {
            Self::Invalid { problems } => problems,
        }
    }

    /// Returns `true` if any problem names `field`.
    #[must_use]
    pub fn mentions(&self, field: &str) -> bool {
        self.problems().iter().any(|p| p.field == field)
    }
}

fn format_problems(problems: &[ConfigProblem]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tunnel lifecycle ──────────────────────────────────────────────────────────

/// Lifecycle state of an SSH tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Starting,
    Listening,
    Stopping,
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Provisioning errors ───────────────────────────────────────────────────────

/// Errors raised during a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioner has no valid configuration. Call prepare first.")]
    NotPrepared,

    #[error("Cannot parse key file {}: {reason}", path.display())]
    KeyFormat { path: PathBuf, reason: String },

    #[error("Cannot bind tunnel to 127.0.0.1:{port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot install key material into the SSH server: {0}")]
    AuthSetup(String),

    #[error("Tunnel cannot start from the {0} state")]
    TunnelState(TunnelState),

    #[error("Failed to launch {}", program.display())]
    Execution {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", command_failed_message(.code))]
    CommandFailed { code: Option<i32> },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn command_failed_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("Automation command exited with status {code}"),
        None => "Automation command was terminated by a signal".to_string(),
    }
}

impl ProvisionError {
    /// Exit code of the automation command, when the run failed because of it.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code } => *code,
            _ => None,
        }
    }
}
