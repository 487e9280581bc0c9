//! fabric-provisioner - run Fabric against a machine through an SSH tunnel

use std::process::ExitCode;

use clap::Parser;

use fabric_provisioner::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
