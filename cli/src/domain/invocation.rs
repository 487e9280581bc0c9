//! Argument construction for the automation command.
//!
//! Pure functions only. The automation tool only ever sees the tunnel's
//! loopback address; the target's real address never reaches its arguments.

use std::path::PathBuf;

use crate::domain::config::{ProvisionerConfig, split_tasks};

/// Loopback address the tunnel listens on.
pub const TUNNEL_HOST: &str = "127.0.0.1";

/// Environment variable carrying the bound tunnel port.
pub const PORT_ENV_VAR: &str = "PACKER_FABRIC_PORT";

/// A fully-resolved child process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Builds the automation invocation addressing `user@127.0.0.1:<port>`.
///
/// Layout: `[-f <fab_file>] -H <user>@127.0.0.1:<port> [extra_arguments…] [tasks…]`.
#[must_use]
pub fn build_invocation(config: &ProvisionerConfig, port: u16) -> CommandInvocation {
    let mut args = Vec::new();
    if let Some(fab_file) = &config.fab_file {
        args.push("-f".to_string());
        args.push(fab_file.display().to_string());
    }
    args.push("-H".to_string());
    args.push(format!("{}@{TUNNEL_HOST}:{port}", config.user));
    args.extend(config.extra_arguments.iter().cloned());
    if let Some(tasks) = &config.fab_tasks {
        args.extend(split_tasks(tasks));
    }

    let mut env: Vec<(String, String)> = config
        .fab_env_vars
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.push((PORT_ENV_VAR.to_string(), port.to_string()));

    CommandInvocation {
        program: config.command.clone(),
        args,
        env,
    }
}
