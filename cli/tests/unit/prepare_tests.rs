//! `prepare` against the real filesystem.
//!
//! Each test builds a temp directory with a stub `fab`, a task file and the
//! fixture keys, then feeds a raw configuration through `FabricProvisioner`.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use fabric_provisioner::FabricProvisioner;
use fabric_provisioner::application::ports::Provisioner;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::mocks::{fixture, stub_command};

struct Workspace {
    dir: TempDir,
    command: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let command = stub_command(dir.path(), "exit 0");
        Self { dir, command }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self) -> Map<String, Value> {
        json!({
            "command": self.command,
            "fab_tasks": "deploy",
            "ssh_host_key_file": fixture("host_ed25519"),
            "ssh_authorized_key_file": fixture("client_ed25519.pub"),
        })
        .as_object()
        .cloned()
        .expect("object")
    }
}

fn prepare(raw: &Map<String, Value>) -> (FabricProvisioner, Result<(), String>) {
    let mut provisioner = FabricProvisioner::new();
    let result = provisioner.prepare(raw).map_err(|e| e.to_string());
    (provisioner, result)
}

// ─── Accepted configurations ──────────────────────────────────────────────────

#[test]
fn test_minimal_config_is_accepted() {
    let ws = Workspace::new();
    let (provisioner, result) = prepare(&ws.config());
    result.expect("valid");
    let config = provisioner.config().expect("stored");
    assert_eq!(config.command, ws.command);
    assert_eq!(config.local_port, None);
    assert_eq!(config.sftp_command, "/usr/lib/sftp-server -e");
}

#[test]
fn test_local_port_in_range_is_accepted() {
    let ws = Workspace::new();
    let mut raw = ws.config();
    raw.insert("local_port".into(), json!(22222));
    let (provisioner, result) = prepare(&raw);
    result.expect("valid");
    assert_eq!(provisioner.config().unwrap().local_port, Some(22222));
}

#[test]
fn test_local_port_as_string_is_accepted() {
    let ws = Workspace::new();
    let mut raw = ws.config();
    raw.insert("local_port".into(), json!("22222"));
    let (provisioner, result) = prepare(&raw);
    result.expect("valid");
    assert_eq!(provisioner.config().unwrap().local_port, Some(22222));
}

#[test]
fn test_fab_file_and_tasks_together_are_accepted() {
    let ws = Workspace::new();
    let fabfile = ws.path("fabfile.py");
    std::fs::write(&fabfile, "def deploy():\n    pass\n").expect("write");
    let mut raw = ws.config();
    raw.insert("fab_file".into(), json!(fabfile));
    let (provisioner, result) = prepare(&raw);
    result.expect("valid");
    let config = provisioner.config().unwrap();
    assert_eq!(config.fab_file.as_deref(), Some(fabfile.as_path()));
    assert_eq!(config.fab_tasks.as_deref(), Some("deploy"));
}

#[test]
fn test_orchestrator_keys_are_ignored() {
    let ws = Workspace::new();
    let mut raw = ws.config();
    raw.insert("packer_build_name".into(), json!("web"));
    raw.insert("packer_debug".into(), json!(false));
    let (_, result) = prepare(&raw);
    result.expect("packer_ keys tolerated");
}

// ─── Rejected configurations ──────────────────────────────────────────────────

#[test]
fn test_missing_fab_file_is_rejected_until_created() {
    let ws = Workspace::new();
    let fabfile = ws.path("fabfile.py");
    let mut raw = ws.config();
    raw.remove("fab_tasks");
    raw.insert("fab_file".into(), json!(fabfile));

    let (_, result) = prepare(&raw);
    let message = result.unwrap_err();
    assert!(message.contains("fab_file"), "got: {message}");

    std::fs::write(&fabfile, "").expect("create fabfile");
    let (_, result) = prepare(&raw);
    result.expect("valid once the file exists");
}

#[test]
fn test_missing_host_key_file_is_rejected_until_created() {
    let ws = Workspace::new();
    let host_key = ws.path("host_key");
    let mut raw = ws.config();
    raw.insert("ssh_host_key_file".into(), json!(host_key));

    let (_, result) = prepare(&raw);
    let message = result.unwrap_err();
    assert!(message.contains("ssh_host_key_file"), "got: {message}");

    std::fs::copy(fixture("host_ed25519"), &host_key).expect("create host key");
    let (provisioner, result) = prepare(&raw);
    result.expect("valid once the file exists");
    assert_eq!(provisioner.config().unwrap().ssh_host_key_file, host_key);
}

#[test]
fn test_missing_authorized_key_file_is_rejected_until_created() {
    let ws = Workspace::new();
    let authorized = ws.path("authorized_key.pub");
    let mut raw = ws.config();
    raw.insert("ssh_authorized_key_file".into(), json!(authorized));

    let (_, result) = prepare(&raw);
    let message = result.unwrap_err();
    assert!(message.contains("ssh_authorized_key_file"), "got: {message}");
    assert!(!message.contains("ssh_host_key_file"), "host key is fine: {message}");

    std::fs::copy(fixture("client_ed25519.pub"), &authorized).expect("create authorized key");
    let (provisioner, result) = prepare(&raw);
    result.expect("valid once the file exists");
    assert_eq!(provisioner.config().unwrap().ssh_authorized_key_file, authorized);
}

#[test]
fn test_local_port_out_of_range_is_rejected() {
    let ws = Workspace::new();
    let mut raw = ws.config();
    raw.insert("local_port".into(), json!(65537));
    let (_, result) = prepare(&raw);
    let message = result.unwrap_err();
    assert!(message.contains("local_port"), "got: {message}");
}

#[test]
fn test_non_executable_command_is_rejected() {
    use std::os::unix::fs::PermissionsExt;
    let ws = Workspace::new();
    std::fs::set_permissions(&ws.command, std::fs::Permissions::from_mode(0o644)).expect("chmod");
    let (_, result) = prepare(&ws.config());
    let message = result.unwrap_err();
    assert!(message.contains("command"), "got: {message}");
}

#[test]
fn test_every_problem_is_reported_at_once() {
    let raw = json!({
        "fab_tasks": "",
        "ssh_host_key_file": "/no/such/host_key",
        "local_port": 0,
        "bogus": true,
    })
    .as_object()
    .cloned()
    .unwrap();
    let (_, result) = prepare(&raw);
    let message = result.unwrap_err();
    for field in [
        "command",
        "fab_tasks",
        "ssh_host_key_file",
        "ssh_authorized_key_file",
        "local_port",
        "bogus",
    ] {
        assert!(message.contains(field), "{field} missing from: {message}");
    }
    let command_at = message.find("command").unwrap();
    let bogus_at = message.find("bogus").unwrap();
    assert!(command_at < bogus_at, "unknown keys are reported last");
}

// ─── Supersession ─────────────────────────────────────────────────────────────

#[test]
fn test_prepare_is_idempotent() {
    let ws = Workspace::new();
    let raw = ws.config();
    let mut provisioner = FabricProvisioner::new();
    provisioner.prepare(&raw).expect("first");
    let first = provisioner.config().cloned();
    provisioner.prepare(&raw).expect("second");
    assert_eq!(provisioner.config().cloned(), first);
}

#[test]
fn test_later_prepare_supersedes_earlier() {
    let ws = Workspace::new();
    let mut provisioner = FabricProvisioner::new();
    provisioner.prepare(&ws.config()).expect("first");

    let mut raw = ws.config();
    raw.insert("local_port".into(), json!(2222));
    provisioner.prepare(&raw).expect("second");
    assert_eq!(provisioner.config().unwrap().local_port, Some(2222));

    raw.insert("local_port".into(), json!(65537));
    assert!(provisioner.prepare(&raw).is_err());
    assert!(provisioner.config().is_none());
}
