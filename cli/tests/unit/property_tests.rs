//! Property-based tests for port validation and invocation construction.
//!
//! Uses `proptest` to verify invariants across many random inputs.

#![allow(clippy::expect_used)]

use std::path::PathBuf;

use fabric_provisioner::domain::ProvisionerConfig;
use fabric_provisioner::domain::build_invocation;
use fabric_provisioner::domain::config::{DEFAULT_SFTP_COMMAND, parse_local_port};
use proptest::prelude::*;
use serde_json::json;

fn config(tasks: &str) -> ProvisionerConfig {
    ProvisionerConfig {
        command: PathBuf::from("/usr/bin/fab"),
        fab_file: None,
        fab_tasks: Some(tasks.to_string()),
        ssh_host_key_file: PathBuf::from("/keys/host"),
        ssh_authorized_key_file: PathBuf::from("/keys/client.pub"),
        local_port: None,
        user: "builder".to_string(),
        extra_arguments: Vec::new(),
        fab_env_vars: Vec::new(),
        sftp_command: DEFAULT_SFTP_COMMAND.to_string(),
    }
}

// ============================================================================
// parse_local_port() property tests
// ============================================================================

proptest! {
    /// Every port in 1..=65535 is accepted as a number and as a string.
    #[test]
    fn prop_valid_ports_accepted(port in 1u32..=65535) {
        let expected = u16::try_from(port).expect("in range");
        prop_assert_eq!(parse_local_port(&json!(port)), Ok(expected));
        prop_assert_eq!(parse_local_port(&json!(port.to_string())), Ok(expected));
    }

    /// Anything above 65535 is rejected.
    #[test]
    fn prop_ports_above_range_rejected(port in 65536u64..=u64::from(u32::MAX)) {
        prop_assert!(parse_local_port(&json!(port)).is_err());
    }

    /// Zero and negatives are rejected.
    #[test]
    fn prop_non_positive_ports_rejected(port in i64::MIN..=0) {
        prop_assert!(parse_local_port(&json!(port)).is_err());
    }
}

#[test]
fn test_fractional_port_rejected() {
    assert!(parse_local_port(&json!(2222.5)).is_err());
}

// ============================================================================
// build_invocation() property tests
// ============================================================================

proptest! {
    /// The automation tool only ever sees the loopback tunnel address.
    #[test]
    fn prop_invocation_targets_loopback(port in 1u16..=65535, tasks in "[a-z]{1,8}( [a-z]{1,8}){0,3}") {
        let invocation = build_invocation(&config(&tasks), port);
        let host = format!("builder@127.0.0.1:{port}");
        let position = invocation.args.iter().position(|a| a == "-H").expect("-H present");
        prop_assert_eq!(&invocation.args[position + 1], &host);
        let trailing: Vec<&str> = tasks.split_whitespace().collect();
        let tail: Vec<&str> = invocation.args[invocation.args.len() - trailing.len()..]
            .iter()
            .map(String::as_str)
            .collect();
        prop_assert_eq!(tail, trailing);
    }
}
