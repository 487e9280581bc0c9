//! CLI argument parsing with clap derive

use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands;
use crate::logging;
use crate::output::OutputContext;

/// Provision machines with Fabric through an ephemeral SSH tunnel
#[derive(Parser)]
#[command(
    name = "fabric-provisioner",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Increase diagnostic logging on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a provisioner configuration file
    Validate(commands::validate::ValidateArgs),

    /// Run Fabric against a target machine
    Provision(commands::provision::ProvisionArgs),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails for a reason other than the
    /// automation command's own exit status.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            quiet,
            no_color,
            verbose,
            command,
        } = self;
        logging::init(verbose);
        let ctx = OutputContext::new(no_color, quiet);
        match command {
            Command::Validate(args) => commands::validate::run(&ctx, &args),
            Command::Provision(args) => commands::provision::run(&ctx, &args).await,
        }
    }
}
