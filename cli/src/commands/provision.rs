//! `fabric-provisioner provision`: run Fabric against a target machine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::application::ports::{ProgressReporter, Provisioner};
use crate::infra::communicator::{SshCommunicator, TargetOptions};
use crate::output::{OutputContext, TerminalReporter};
use crate::provisioner::FabricProvisioner;

/// SSH port assumed when `--target` has none.
pub const DEFAULT_TARGET_PORT: u16 = 22;

/// Arguments for the provision command.
#[derive(Args)]
pub struct ProvisionArgs {
    /// Provisioner configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Target machine as host[:port]
    #[arg(short, long)]
    pub target: String,

    /// Login user on the target
    #[arg(long, default_value = "root")]
    pub target_user: String,

    /// Private key used to log in to the target
    #[arg(short, long)]
    pub identity: PathBuf,

    /// Expected target host public key; any key is accepted when omitted
    #[arg(long)]
    pub target_host_key: Option<PathBuf>,
}

/// Prepare, connect to the target, and provision it.
///
/// When the automation command fails, its exit code becomes the process exit
/// code.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the target is
/// unreachable, or the run fails before the automation command exits.
pub async fn run(ctx: &OutputContext, args: &ProvisionArgs) -> Result<ExitCode> {
    let raw = super::load_config_file(&args.config)?;
    let mut provisioner = FabricProvisioner::new();
    provisioner.prepare(&raw)?;

    let (host, port) = parse_target(&args.target)?;
    let reporter = TerminalReporter::new(ctx);
    reporter.step(&format!("Connecting to {}@{host}:{port}", args.target_user));
    let communicator = SshCommunicator::connect(&TargetOptions {
        host,
        port,
        user: args.target_user.clone(),
        identity: args.identity.clone(),
        host_key: args.target_host_key.clone(),
    })
    .await
    .with_context(|| format!("cannot connect to target {}", args.target))?;

    match provisioner.provision(&reporter, Arc::new(communicator)).await {
        Ok(()) => {
            reporter.success("Provisioning complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match e.exit_code() {
            Some(code) => {
                ctx.error(&e.to_string());
                Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
            }
            None => Err(e.into()),
        },
    }
}

/// Split `host[:port]`. IPv6 literals need brackets when a port is given.
///
/// # Errors
///
/// Returns an error if the host is empty or the port is not a valid number.
pub fn parse_target(target: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            bail!("unterminated '[' in target {target:?}");
        };
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => bail!("unexpected {tail:?} after ']' in target {target:?}"),
        }
    } else if target.matches(':').count() == 1 {
        let (host, port) = target.split_once(':').unwrap_or((target, ""));
        (host, Some(port))
    } else {
        (target, None)
    };

    if host.is_empty() {
        bail!("target {target:?} has no host");
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .with_context(|| format!("invalid port {port:?} in target {target:?}"))?,
        None => DEFAULT_TARGET_PORT,
    };
    Ok((host.to_string(), port))
}
