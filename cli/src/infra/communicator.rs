//! SSH-backed `Communicator` for driving the provisioner from the command line.
//!
//! A host orchestrator normally supplies its own connection to the target.
//! `SshCommunicator` stands in for it: it opens one authenticated russh client
//! connection and starts each command on a fresh session channel, exposing the
//! channel's streams as plain async pipes.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, client};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::application::ports::{Communicator, RemoteProcess};
use crate::infra::keys::{load_authorized_key, load_host_key};

/// Exit status reported for a command killed by a signal on the target.
pub const SIGNAL_EXIT_STATUS: u32 = 255;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Where and how to reach the target machine.
#[derive(Debug, Clone)]
pub struct TargetOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key used to authenticate to the target.
    pub identity: PathBuf,
    /// Expected target host public key. Any key is accepted when unset.
    pub host_key: Option<PathBuf>,
}

struct TargetHandler {
    host: String,
    pinned: Option<PublicKey>,
}

impl client::Handler for TargetHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        match &self.pinned {
            Some(pinned) if pinned.key_data() == server_public_key.key_data() => {
                debug!(host = %self.host, %fingerprint, "target host key matches pin");
                Ok(true)
            }
            Some(_) => {
                warn!(host = %self.host, %fingerprint, "target host key does not match pin");
                Ok(false)
            }
            None => {
                warn!(host = %self.host, %fingerprint, "accepting unpinned target host key");
                Ok(true)
            }
        }
    }
}

/// An authenticated SSH connection to the target machine.
pub struct SshCommunicator {
    handle: client::Handle<TargetHandler>,
}

impl SshCommunicator {
    /// Connect and authenticate with the identity key.
    ///
    /// # Errors
    ///
    /// Fails if a key cannot be loaded, the connection cannot be made, the
    /// host key does not match the pin, or the target rejects the identity.
    pub async fn connect(options: &TargetOptions) -> Result<Self> {
        let pinned = options
            .host_key
            .as_deref()
            .map(load_authorized_key)
            .transpose()?;
        let identity = load_host_key(&options.identity)?;

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });
        let handler = TargetHandler {
            host: options.host.clone(),
            pinned,
        };

        let addr = format!("{}:{}", options.host, options.port);
        let mut handle = client::connect(config, addr.as_str(), handler)
            .await
            .with_context(|| format!("SSH connection to {addr} failed"))?;
        info!(%addr, "connected to target");

        let hash = handle
            .best_supported_rsa_hash()
            .await
            .context("SSH negotiation with target failed")?
            .flatten();
        let auth = handle
            .authenticate_publickey(
                &options.user,
                PrivateKeyWithHashAlg::new(Arc::new(identity), hash),
            )
            .await
            .context("SSH authentication to target failed")?;
        if !auth.success() {
            bail!(
                "target rejected key {} for user {}",
                options.identity.display(),
                options.user
            );
        }
        info!(user = %options.user, "authenticated to target");

        Ok(Self { handle })
    }
}

#[async_trait::async_trait]
impl Communicator for SshCommunicator {
    async fn start(&self, command: &str) -> io::Result<RemoteProcess> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(io::Error::other)?;
        channel.exec(true, command).await.map_err(io::Error::other)?;
        debug!(command, "started command on target");

        let (stdin, stdin_source) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_sink, stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_sink, stderr) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(bridge_channel(
            channel,
            Pipes {
                stdin: stdin_source,
                stdout: stdout_sink,
                stderr: stderr_sink,
            },
            exit_tx,
        ));

        Ok(RemoteProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move {
                exit_rx
                    .await
                    .map_err(|_| io::Error::other("SSH channel dropped before exit"))?
            }),
        })
    }
}

struct Pipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

/// Shuttle bytes between the SSH channel and the local pipes until the
/// target closes the channel.
async fn bridge_channel(
    channel: russh::Channel<client::Msg>,
    pipes: Pipes,
    exit_tx: oneshot::Sender<io::Result<u32>>,
) {
    let Pipes {
        mut stdin,
        mut stdout,
        mut stderr,
    } = pipes;
    let (mut reader, writer) = channel.split();

    let upload = tokio::spawn(async move {
        let mut writer = writer.make_writer();
        let _ = tokio::io::copy(&mut stdin, &mut writer).await;
        let _ = writer.shutdown().await;
    });

    let mut status = None;
    while let Some(msg) = reader.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                let _ = stdout.write_all(&data).await;
            }
            ChannelMsg::ExtendedData { data, ext: 1 } => {
                let _ = stderr.write_all(&data).await;
            }
            ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                debug!(signal = ?signal_name, "target command killed by signal");
                status.get_or_insert(SIGNAL_EXIT_STATUS);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    upload.abort();
    drop(stdout);
    drop(stderr);

    let result =
        status.ok_or_else(|| io::Error::other("SSH channel closed without an exit status"));
    let _ = exit_tx.send(result);
}
