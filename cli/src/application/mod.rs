//! Provisioning use-cases and the ports they drive.
//!
//! Nothing here reaches into `crate::infra`, `crate::commands` or
//! `crate::output`; adapters are plugged in through `ports`.

pub mod ports;
pub mod services;

pub use ports::{
    CommandResult, CommandRunner, Communicator, HostEnvironment, ProgressReporter, Provisioner,
    RemoteProcess,
};
