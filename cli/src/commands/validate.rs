//! `fabric-provisioner validate`: check a configuration file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use crate::application::ports::Provisioner;
use crate::output::OutputContext;
use crate::provisioner::FabricProvisioner;

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    /// Provisioner configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Validate the configuration and print the resolved settings.
///
/// # Errors
///
/// Returns an error listing every configuration problem.
pub fn run(ctx: &OutputContext, args: &ValidateArgs) -> Result<ExitCode> {
    let raw = super::load_config_file(&args.config)?;
    let mut provisioner = FabricProvisioner::new();
    provisioner.prepare(&raw)?;

    let config = provisioner
        .config()
        .context("configuration was not stored")?;
    let resolved = serde_json::to_value(config).context("cannot render configuration")?;

    ctx.success(&format!("{} is valid", args.config.display()));
    if let Value::Object(fields) = resolved {
        for (key, value) in &fields {
            ctx.kv(key, &render(value));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "-".to_string(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}
