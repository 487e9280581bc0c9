//! Provisioner configuration, errors and command construction.
//!
//! Synchronous and free of I/O: no `tokio`, `std::fs`, `std::process` or
//! `std::net`, and no imports from the other layers.

pub mod config;
pub mod error;
pub mod invocation;

pub use config::ProvisionerConfig;
pub use error::{ConfigError, ConfigProblem, ProvisionError, TunnelState};
pub use invocation::{CommandInvocation, build_invocation};
