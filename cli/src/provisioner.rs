//! The orchestrator-facing provisioner.
//!
//! Composes validation, key loading, port selection, the SSH tunnel and the
//! automation command run into the two-phase `Provisioner` contract.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::application::ports::{
    CommandRunner, Communicator, HostEnvironment, ProgressReporter, Provisioner,
};
use crate::application::services::automation::run_automation;
use crate::application::services::config_validator::validate_config;
use crate::domain::ProvisionerConfig;
use crate::domain::error::{ConfigError, ProvisionError};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::fs::LocalEnvironment;
use crate::infra::keys::{KeyPair, load_key_pair};
use crate::infra::network::resolve_port;
use crate::infra::tunnel::SshTunnel;

/// Tunnel start attempts when the port is chosen by the OS.
pub const BIND_ATTEMPTS: usize = 3;

/// Runs Fabric against a target through an ephemeral SSH tunnel.
///
/// Generic over `R: CommandRunner` and `E: HostEnvironment` so tests can
/// inject fakes without spawning processes or touching the filesystem.
pub struct FabricProvisioner<R = TokioCommandRunner, E = LocalEnvironment> {
    runner: R,
    env: E,
    config: Option<ProvisionerConfig>,
}

impl FabricProvisioner {
    /// Provisioner backed by real processes and the local filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(TokioCommandRunner, LocalEnvironment)
    }
}

impl Default for FabricProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, E> FabricProvisioner<R, E> {
    pub fn with_parts(runner: R, env: E) -> Self {
        Self {
            runner,
            env,
            config: None,
        }
    }

    /// Configuration accepted by the last successful `prepare`.
    #[must_use]
    pub fn config(&self) -> Option<&ProvisionerConfig> {
        self.config.as_ref()
    }
}

impl<R: CommandRunner, E: HostEnvironment> Provisioner for FabricProvisioner<R, E> {
    fn prepare(&mut self, raw: &Map<String, Value>) -> Result<(), ConfigError> {
        self.config = None;
        let config = validate_config(raw, &self.env)?;
        debug!(?config, "provisioner configuration accepted");
        self.config = Some(config);
        Ok(())
    }

    async fn provision(
        &self,
        reporter: &impl ProgressReporter,
        communicator: Arc<dyn Communicator>,
    ) -> Result<(), ProvisionError> {
        let config = self.config.as_ref().ok_or(ProvisionError::NotPrepared)?;
        let keys = load_key_pair(config)?;

        let mut tunnel = SshTunnel::new(communicator, config.sftp_command.clone());
        let port = start_tunnel(&mut tunnel, config, &keys, resolve_port).await?;
        drop(keys);
        reporter.success(&format!("SSH tunnel listening on 127.0.0.1:{port}"));

        let result = run_automation(config, port, &self.runner, reporter).await;
        tunnel.stop().await;

        match &result {
            Ok(_) => info!(port, "provisioning finished"),
            Err(e) => info!(port, error = %e, "provisioning failed"),
        }
        result.map(|_| ())
    }
}

/// Start `tunnel`, retrying with fresh ephemeral ports if one is taken
/// between allocation and bind. A configured port is tried once.
///
/// `next_port` is asked for a port before every attempt.
async fn start_tunnel(
    tunnel: &mut SshTunnel,
    config: &ProvisionerConfig,
    keys: &KeyPair,
    mut next_port: impl FnMut(&ProvisionerConfig) -> Result<u16, ProvisionError>,
) -> Result<u16, ProvisionError> {
    let attempts = if config.local_port.is_some() {
        1
    } else {
        BIND_ATTEMPTS
    };
    let mut attempt = 1;
    loop {
        let port = next_port(config)?;
        match tunnel.start(keys.clone(), port).await {
            Ok(bound) => return Ok(bound),
            Err(ProvisionError::Bind { port, source }) if attempt < attempts => {
                warn!(port, attempt, error = %source, "ephemeral port was taken, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
