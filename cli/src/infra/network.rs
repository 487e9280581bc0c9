//! Tunnel port selection.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use crate::domain::ProvisionerConfig;
use crate::domain::error::ProvisionError;

/// Returns the configured `local_port`, or asks the OS for a free one.
///
/// The ephemeral port is released before returning; binding it (and any
/// resulting bind conflict) is the tunnel's job.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] if the OS cannot hand out an ephemeral port.
pub fn resolve_port(config: &ProvisionerConfig) -> Result<u16, ProvisionError> {
    match config.local_port {
        Some(port) => Ok(port),
        None => ephemeral_port(),
    }
}

/// Ask the OS for a currently free loopback TCP port.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] if binding `127.0.0.1:0` fails.
pub fn ephemeral_port() -> Result<u16, ProvisionError> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    Ok(listener.local_addr()?.port())
}
