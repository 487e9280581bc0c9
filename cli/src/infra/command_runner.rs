//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` launches the automation command with tokio, streams
//! each stdout and stderr line to the reporter as it arrives, and keeps the
//! full output for the caller.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::application::ports::{CommandResult, CommandRunner, ProgressReporter};
use crate::domain::CommandInvocation;
use crate::domain::error::ProvisionError;

/// Production `CommandRunner`.
///
/// There is no timeout: the command runs until it exits. The child is killed
/// if the future running it is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    async fn run_streaming(
        &self,
        invocation: &CommandInvocation,
        reporter: &impl ProgressReporter,
    ) -> Result<CommandResult, ProvisionError> {
        let execution = |source| ProvisionError::Execution {
            program: invocation.program.clone(),
            source,
        };

        let mut child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(execution)?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let (stdout, stderr) = tokio::join!(
            relay_lines(stdout_handle, reporter),
            relay_lines(stderr_handle, reporter),
        );
        let status = child.wait().await.map_err(execution)?;

        Ok(CommandResult {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Forward each line of `reader` to `reporter`, returning everything read.
async fn relay_lines<R>(reader: Option<R>, reporter: &impl ProgressReporter) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(reader) = reader else {
        return captured;
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                captured.extend_from_slice(&line);
                let text = String::from_utf8_lossy(&line);
                reporter.output(text.trim_end_matches(['\n', '\r']));
            }
        }
    }
    captured
}
