//! Run the automation command against the tunnel.
//!
//! Builds the invocation from the validated config and the bound tunnel port,
//! runs it through the injected `CommandRunner`, and turns a non-zero exit
//! into [`ProvisionError::CommandFailed`]. Output content is never inspected.

use tracing::info;

use crate::application::ports::{CommandResult, CommandRunner, ProgressReporter};
use crate::domain::error::ProvisionError;
use crate::domain::{ProvisionerConfig, build_invocation};

/// Run the configured automation command addressing `127.0.0.1:<port>`.
///
/// # Errors
///
/// Returns [`ProvisionError::Execution`] if the command cannot be launched and
/// [`ProvisionError::CommandFailed`] if it exits non-zero.
pub async fn run_automation(
    config: &ProvisionerConfig,
    port: u16,
    runner: &impl CommandRunner,
    reporter: &impl ProgressReporter,
) -> Result<CommandResult, ProvisionError> {
    let invocation = build_invocation(config, port);
    reporter.step(&format!(
        "Executing {} {}",
        invocation.program.display(),
        invocation.args.join(" ")
    ));
    info!(program = %invocation.program.display(), port, "starting automation command");

    let result = runner.run_streaming(&invocation, reporter).await?;
    info!(code = ?result.code, "automation command finished");

    if result.success() {
        Ok(result)
    } else {
        Err(ProvisionError::CommandFailed { code: result.code })
    }
}
