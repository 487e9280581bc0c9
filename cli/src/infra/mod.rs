//! Adapters that touch the host: processes, files, sockets and SSH.
//!
//! May import `crate::domain` and `crate::application::ports`, never
//! `crate::commands` or `crate::output`.

pub mod command_runner;
pub mod communicator;
pub mod fs;
pub mod keys;
pub mod network;
pub mod tunnel;
