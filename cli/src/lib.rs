//! Run Fabric against a build target through an ephemeral local SSH server.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod application;
pub mod cli;
pub mod commands;
pub mod domain;
pub mod infra;
pub mod logging;
pub mod output;
pub mod provisioner;

pub use provisioner::FabricProvisioner;
