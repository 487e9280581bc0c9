//! Ephemeral SSH server the automation client connects to.
//!
//! The tunnel listens on `127.0.0.1:<port>`, presents the configured host key,
//! admits only the authorized public key, and relays every `exec` (and the
//! `sftp` subsystem) over the orchestrator-supplied `Communicator`. Each TCP
//! connection and each relayed channel runs in its own task, so one failing
//! connection never disturbs the listener or its siblings.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use russh::keys::{Algorithm, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec, Disconnect};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::application::ports::{Communicator, RemoteProcess};
use crate::domain::error::{ProvisionError, TunnelState};
use crate::infra::keys::KeyPair;

/// How long `stop` waits for the accept loop to drain before aborting it.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Exit status reported to the client when the target cannot run a command.
pub const RELAY_FAILURE_STATUS: u32 = 255;

/// SSH extended-data type for stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

const RELAY_BUFFER: usize = 32 * 1024;

/// A local SSH endpoint forwarding commands to the target machine.
pub struct SshTunnel {
    communicator: Arc<dyn Communicator>,
    sftp_command: String,
    state: TunnelState,
    session: Option<TunnelSession>,
}

struct TunnelSession {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl SshTunnel {
    /// Create an idle tunnel relaying to `communicator`.
    ///
    /// `sftp_command` is the remote command run for the `sftp` subsystem.
    pub fn new(communicator: Arc<dyn Communicator>, sftp_command: impl Into<String>) -> Self {
        Self {
            communicator,
            sftp_command: sftp_command.into(),
            state: TunnelState::Idle,
            session: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Bound port while the tunnel is listening.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.port)
    }

    /// Number of SSH connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.active.load(Ordering::SeqCst))
    }

    /// Install `keys` and bind `127.0.0.1:port` (`0` lets the OS choose).
    ///
    /// Returns the bound port once the listener accepts connections. On
    /// failure the tunnel stays `Idle` and may be started again.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::TunnelState`] if the tunnel is not idle.
    /// - [`ProvisionError::AuthSetup`] if the host key cannot serve as an SSH
    ///   server identity.
    /// - [`ProvisionError::Bind`] if the port is unavailable.
    pub async fn start(&mut self, keys: KeyPair, port: u16) -> Result<u16, ProvisionError> {
        if self.state != TunnelState::Idle {
            return Err(ProvisionError::TunnelState(self.state));
        }
        self.state = TunnelState::Starting;
        match self.listen(keys, port).await {
            Ok(bound) => {
                self.state = TunnelState::Listening;
                Ok(bound)
            }
            Err(e) => {
                self.state = TunnelState::Idle;
                Err(e)
            }
        }
    }

    async fn listen(&mut self, keys: KeyPair, port: u16) -> Result<u16, ProvisionError> {
        let (host_key, authorized_key) = keys.into_parts();
        let config = Arc::new(server_config(host_key)?);

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .await
            .map_err(|source| ProvisionError::Bind { port, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| ProvisionError::Bind { port, source })?
            .port();

        let context = Arc::new(SessionContext {
            config,
            authorized_key,
            communicator: Arc::clone(&self.communicator),
            sftp_command: self.sftp_command.clone(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let active = Arc::new(AtomicUsize::new(0));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            context,
            shutdown_rx,
            Arc::clone(&active),
        ));

        info!(port = bound, "SSH tunnel listening on 127.0.0.1");
        self.session = Some(TunnelSession {
            port: bound,
            shutdown_tx,
            accept_task,
            active,
        });
        Ok(bound)
    }

    /// Close the listener and every forwarded connection, releasing the port.
    ///
    /// Safe to call in any state; always leaves the tunnel `Closed`.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = TunnelState::Closed;
            return;
        };
        self.state = TunnelState::Stopping;

        let TunnelSession {
            port,
            shutdown_tx,
            mut accept_task,
            ..
        } = session;
        let _ = shutdown_tx.send(());
        if tokio::time::timeout(STOP_GRACE, &mut accept_task)
            .await
            .is_err()
        {
            warn!(port, "tunnel did not drain in time, aborting connections");
            accept_task.abort();
            let _ = accept_task.await;
        }

        self.state = TunnelState::Closed;
        info!(port, "SSH tunnel stopped");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.accept_task.abort();
        }
    }
}

fn server_config(host_key: PrivateKey) -> Result<server::Config, ProvisionError> {
    let algorithm = host_key.algorithm();
    if matches!(
        algorithm,
        Algorithm::Dsa | Algorithm::SkEcdsaSha2NistP256 | Algorithm::SkEd25519 | Algorithm::Other(_)
    ) {
        return Err(ProvisionError::AuthSetup(format!(
            "{} keys cannot be used as an SSH host key",
            algorithm.as_str()
        )));
    }
    Ok(server::Config {
        keys: vec![host_key],
        auth_rejection_time: Duration::from_millis(250),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: None,
        ..Default::default()
    })
}

// ── Accept loop ───────────────────────────────────────────────────────────────

struct SessionContext {
    config: Arc<server::Config>,
    authorized_key: PublicKey,
    communicator: Arc<dyn Communicator>,
    sftp_command: String,
}

/// Decrements the active-connection count when a connection task ends or is aborted.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<SessionContext>,
    mut shutdown_rx: oneshot::Receiver<()>,
    active: Arc<AtomicUsize>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted tunnel connection");
                    let guard = ConnectionGuard::enter(&active);
                    let context = Arc::clone(&context);
                    connections.spawn(async move {
                        let _guard = guard;
                        match serve_connection(stream, peer, context).await {
                            Ok(()) => debug!(%peer, "tunnel connection closed"),
                            Err(e) => warn!(%peer, error = %e, "tunnel connection failed"),
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept tunnel connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    connections.shutdown().await;
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<SessionContext>,
) -> Result<(), russh::Error> {
    let _ = stream.set_nodelay(true);
    let handler = TunnelHandler {
        context: Arc::clone(&context),
        peer,
        channels: HashMap::new(),
        relays: JoinSet::new(),
    };
    let session = server::run_stream(Arc::clone(&context.config), stream, handler).await?;
    let _guard = SessionGuard(session.handle());
    session.await
}

/// Disconnects the russh session, which runs in its own task, when the
/// connection task ends or is aborted.
struct SessionGuard(server::Handle);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let handle = self.0.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = handle
                    .disconnect(
                        Disconnect::ByApplication,
                        "tunnel closed".to_string(),
                        String::new(),
                    )
                    .await;
            });
        }
    }
}

// ── Per-connection SSH handler ────────────────────────────────────────────────

struct TunnelHandler {
    context: Arc<SessionContext>,
    peer: SocketAddr,
    /// Session channels opened but not yet running a command.
    channels: HashMap<ChannelId, Channel<Msg>>,
    /// Dropped with the handler, which aborts every relay of this connection.
    relays: JoinSet<()>,
}

impl TunnelHandler {
    fn check_key(&self, user: &str, key: &PublicKey) -> Auth {
        if key.key_data() == self.context.authorized_key.key_data() {
            debug!(peer = %self.peer, user, "accepted authorized key");
            Auth::Accept
        } else {
            warn!(peer = %self.peer, user, "rejected unknown public key");
            Auth::reject()
        }
    }

    fn start_relay(
        &mut self,
        id: ChannelId,
        command: String,
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        while self.relays.try_join_next().is_some() {}

        let Some(channel) = self.channels.remove(&id) else {
            warn!(peer = %self.peer, ?id, "channel is already running a command");
            session.channel_failure(id)?;
            return Ok(());
        };
        session.channel_success(id)?;

        let handle = session.handle();
        let communicator = Arc::clone(&self.context.communicator);
        self.relays
            .spawn(relay_channel(channel, handle, communicator, command));
        Ok(())
    }
}

impl server::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.check_key(user, public_key))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.check_key(user, public_key))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(peer = %self.peer, id = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Commands run without a terminal on the target; accept so pty-hungry
        // clients proceed.
        session.channel_success(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        debug!(peer = %self.peer, %command, "exec request");
        self.start_relay(channel, command, session)
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name == "sftp" {
            let command = self.context.sftp_command.clone();
            debug!(peer = %self.peer, %command, "sftp subsystem request");
            self.start_relay(channel, command, session)
        } else {
            warn!(peer = %self.peer, subsystem = name, "refusing unsupported subsystem");
            session.channel_failure(channel)?;
            Ok(())
        }
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(peer = %self.peer, "refusing interactive shell request");
        session.channel_failure(channel)?;
        Ok(())
    }
}

// ── Channel relay ─────────────────────────────────────────────────────────────

/// How the client side of a relayed channel finished.
#[derive(Debug, PartialEq, Eq)]
enum InboundEnd {
    /// Client sent EOF; the remote command keeps running.
    Eof,
    /// Client closed the channel or the connection went away.
    Closed,
}

async fn relay_channel(
    mut channel: Channel<Msg>,
    handle: server::Handle,
    communicator: Arc<dyn Communicator>,
    command: String,
) {
    let id = channel.id();
    let process = match communicator.start(&command).await {
        Ok(process) => process,
        Err(e) => {
            warn!(%command, error = %e, "target could not start command");
            let message = CryptoVec::from(format!("{e}\n").into_bytes());
            let _ = handle
                .extended_data(id, EXTENDED_DATA_STDERR, message)
                .await;
            finish_channel(&handle, id, RELAY_FAILURE_STATUS).await;
            return;
        }
    };

    let RemoteProcess {
        stdin,
        stdout,
        stderr,
        exit,
    } = process;

    // Borrows the channel so it stays open until the exit status is sent.
    // Takes stdin by value: some writers only signal EOF when dropped.
    let mut inbound = Box::pin(async {
        let mut stdin = stdin;
        let end = loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    if stdin.write_all(&data).await.is_err() {
                        break InboundEnd::Eof;
                    }
                }
                Some(ChannelMsg::Eof) => break InboundEnd::Eof,
                Some(ChannelMsg::Close) | None => break InboundEnd::Closed,
                Some(_) => {}
            }
        };
        let _ = stdin.shutdown().await;
        drop(stdin);
        end
    });

    let mut outbound = Box::pin(async {
        tokio::join!(
            pump(stdout, &handle, id, None),
            pump(stderr, &handle, id, Some(EXTENDED_DATA_STDERR)),
        );
        exit.await
    });

    let mut inbound_done = false;
    let status = loop {
        tokio::select! {
            status = &mut outbound => break status,
            end = &mut inbound, if !inbound_done => {
                inbound_done = true;
                if end == InboundEnd::Closed {
                    debug!(%command, "client closed channel, abandoning remote command");
                    return;
                }
            }
        }
    };

    let code = status.unwrap_or_else(|e| {
        warn!(%command, error = %e, "lost remote exit status");
        RELAY_FAILURE_STATUS
    });
    debug!(%command, code, "remote command finished");
    finish_channel(&handle, id, code).await;
}

async fn pump(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    handle: &server::Handle,
    id: ChannelId,
    extended: Option<u32>,
) {
    let mut buf = vec![0u8; RELAY_BUFFER];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let data = CryptoVec::from_slice(&buf[..n]);
        let sent = match extended {
            Some(ext) => handle.extended_data(id, ext, data).await,
            None => handle.data(id, data).await,
        };
        if sent.is_err() {
            break;
        }
    }
}

async fn finish_channel(handle: &server::Handle, id: ChannelId, code: u32) {
    let _ = handle.exit_status_request(id, code).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}
