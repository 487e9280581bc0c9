//! One module per provisioning step, written against the ports only.

pub mod automation;
pub mod config_validator;
