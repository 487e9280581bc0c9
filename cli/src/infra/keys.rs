//! SSH key material loading for the tunnel.
//!
//! The host key is the private key the tunnel presents to the automation
//! client; the authorized key is the only client public key it admits.

use std::fmt;
use std::path::Path;

use russh::keys::{PrivateKey, PublicKey};
use tracing::debug;

use crate::domain::ProvisionerConfig;
use crate::domain::error::ProvisionError;

/// Decoded key material for one tunnel session.
///
/// The private key zeroizes its secret on drop. `Debug` prints fingerprints
/// only.
#[derive(Clone)]
pub struct KeyPair {
    host_key: PrivateKey,
    authorized_key: PublicKey,
}

impl KeyPair {
    #[must_use]
    pub fn new(host_key: PrivateKey, authorized_key: PublicKey) -> Self {
        Self {
            host_key,
            authorized_key,
        }
    }

    /// Split into the host key and the authorized key.
    #[must_use]
    pub fn into_parts(self) -> (PrivateKey, PublicKey) {
        (self.host_key, self.authorized_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("host_key", &self.host_key.algorithm().as_str())
            .field("authorized_key", &self.authorized_key.algorithm().as_str())
            .finish()
    }
}

/// Load the host and authorized keys named by `config`.
///
/// # Errors
///
/// Returns [`ProvisionError::KeyFormat`] if either file cannot be read or
/// parsed.
pub fn load_key_pair(config: &ProvisionerConfig) -> Result<KeyPair, ProvisionError> {
    let host_key = load_host_key(&config.ssh_host_key_file)?;
    let authorized_key = load_authorized_key(&config.ssh_authorized_key_file)?;
    debug!(
        host_key = %host_key.algorithm().as_str(),
        authorized_key = %authorized_key.algorithm().as_str(),
        "loaded tunnel key material"
    );
    Ok(KeyPair::new(host_key, authorized_key))
}

/// Parse an OpenSSH or PEM private key file.
///
/// # Errors
///
/// Returns [`ProvisionError::KeyFormat`] if the file is unreadable, not a
/// private key, or passphrase-protected.
pub fn load_host_key(path: &Path) -> Result<PrivateKey, ProvisionError> {
    let text = read_key_file(path)?;
    russh::keys::decode_secret_key(&text, None).map_err(|e| key_format(path, e.to_string()))
}

/// Parse an `authorized_keys`-style public key file.
///
/// The first line that is neither blank nor a `#` comment is used.
///
/// # Errors
///
/// Returns [`ProvisionError::KeyFormat`] if the file is unreadable, empty, or
/// the line is not an OpenSSH public key.
pub fn load_authorized_key(path: &Path) -> Result<PublicKey, ProvisionError> {
    let text = read_key_file(path)?;
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .ok_or_else(|| key_format(path, "file contains no public key".to_string()))?;
    PublicKey::from_openssh(line).map_err(|e| key_format(path, e.to_string()))
}

fn read_key_file(path: &Path) -> Result<String, ProvisionError> {
    std::fs::read_to_string(path).map_err(|e| key_format(path, e.to_string()))
}

fn key_format(path: &Path, reason: String) -> ProvisionError {
    ProvisionError::KeyFormat {
        path: path.to_path_buf(),
        reason,
    }
}
