//! Seams between the provisioning flow and the outside world.
//!
//! The host orchestrator supplies a `Communicator` and a `ProgressReporter`;
//! `infra` supplies the rest.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{CommandInvocation, ConfigError, ProvisionError};

// ── Host orchestrator contract ────────────────────────────────────────────────

/// The two-phase contract a host orchestrator drives.
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    /// Validate `raw` and keep the resulting configuration.
    ///
    /// Performs no network or process activity. Each call fully supersedes
    /// the previous one, including a failed call clearing earlier state.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every invalid or missing field.
    fn prepare(&mut self, raw: &Map<String, Value>) -> Result<(), ConfigError>;

    /// Run the automation command against the target behind `communicator`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error unmodified.
    async fn provision(
        &self,
        reporter: &impl ProgressReporter,
        communicator: Arc<dyn Communicator>,
    ) -> Result<(), ProvisionError>;
}

// ── Target connection ─────────────────────────────────────────────────────────

/// A command started on the target machine.
///
/// Dropping it abandons the remote command; implementations release the
/// underlying channel or process.
pub struct RemoteProcess {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves to the remote exit status once the command finishes.
    pub exit: BoxFuture<'static, io::Result<u32>>,
}

/// Live connection handle to the target machine, supplied by the orchestrator.
#[async_trait::async_trait]
pub trait Communicator: Send + Sync {
    /// Start `command` on the target with piped stdio.
    async fn start(&self, command: &str) -> io::Result<RemoteProcess>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Terminal state of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Spawn `invocation`, forward each output line to `reporter`, and wait
    /// for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Execution`] if the process cannot be spawned
    /// or waited on. A non-zero exit is not an error at this level.
    async fn run_streaming(
        &self,
        invocation: &CommandInvocation,
        reporter: &impl ProgressReporter,
    ) -> Result<CommandResult, ProvisionError>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the terminal output module.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
    /// Relay one line of output from the automation command.
    fn output(&self, line: &str);
}

// ── Host environment port ─────────────────────────────────────────────────────

/// Abstracts the filesystem and process environment the validator consults.
pub trait HostEnvironment {
    /// Returns `true` if `path` exists.
    fn exists(&self, path: &Path) -> bool;
    /// Returns `true` if `path` is a regular file the current user may execute.
    fn is_executable(&self, path: &Path) -> bool;
    /// Resolve a bare program name through `PATH`.
    fn find_executable(&self, name: &str) -> Option<PathBuf>;
    /// Login name of the current user, if known.
    fn current_user(&self) -> Option<String>;
}
