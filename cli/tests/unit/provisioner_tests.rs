//! Unit tests for `FabricProvisioner::provision` with a mocked runner.
//!
//! The tunnel is real (bound on loopback with the fixture keys); only the
//! automation command is replaced by `MockCommandRunner`.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use fabric_provisioner::FabricProvisioner;
use fabric_provisioner::application::ports::Provisioner;
use fabric_provisioner::domain::error::ProvisionError;
use fabric_provisioner::infra::fs::LocalEnvironment;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::mocks::{MockCommandRunner, RecordingReporter, fixture, offline, stub_command};

fn raw(dir: &TempDir, extra: Value) -> Map<String, Value> {
    let command = stub_command(dir.path(), "exit 0");
    let mut raw = json!({
        "command": command,
        "fab_tasks": "deploy",
        "ssh_host_key_file": fixture("host_ed25519"),
        "ssh_authorized_key_file": fixture("client_ed25519.pub"),
        "user": "builder",
    })
    .as_object()
    .cloned()
    .unwrap();
    if let Value::Object(extra) = extra {
        raw.extend(extra);
    }
    raw
}

fn prepared(runner: &MockCommandRunner, raw: &Map<String, Value>) -> FabricProvisioner<MockCommandRunner> {
    let mut provisioner = FabricProvisioner::with_parts(runner.clone(), LocalEnvironment);
    provisioner.prepare(raw).expect("valid config");
    provisioner
}

fn port_of(run: &crate::mocks::RecordedRun) -> u16 {
    let host = run
        .invocation
        .args
        .iter()
        .find(|a| a.starts_with("builder@127.0.0.1:"))
        .expect("-H target");
    host.rsplit(':').next().unwrap().parse().unwrap()
}

// ─── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_provision_runs_command_against_live_tunnel() {
    let dir = TempDir::new().unwrap();
    let runner = MockCommandRunner::exiting(Some(0));
    let provisioner = prepared(&runner, &raw(&dir, json!({})));
    let reporter = RecordingReporter::default();

    provisioner
        .provision(&reporter, offline())
        .await
        .expect("exit 0 succeeds");

    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].tunnel_reachable, "tunnel must listen before the command runs");
    assert_eq!(runs[0].invocation.args.last().map(String::as_str), Some("deploy"));

    let port = port_of(&runs[0]);
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("port released after provision");

    let lines = reporter.lines();
    assert!(
        lines.contains(&format!("success:SSH tunnel listening on 127.0.0.1:{port}")),
        "got: {lines:?}"
    );
    assert!(lines.iter().any(|l| l.starts_with("step:Executing ")));
    assert!(lines.iter().any(|l| l.starts_with("output:")));
}

#[tokio::test]
async fn test_configured_local_port_is_used() {
    let dir = TempDir::new().unwrap();
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let runner = MockCommandRunner::exiting(Some(0));
    let provisioner = prepared(&runner, &raw(&dir, json!({ "local_port": port })));

    provisioner
        .provision(&RecordingReporter::default(), offline())
        .await
        .expect("runs");
    assert_eq!(port_of(&runner.runs()[0]), port);
}

// ─── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_zero_exit_is_command_failed_and_tunnel_stops() {
    let dir = TempDir::new().unwrap();
    let runner = MockCommandRunner::exiting(Some(1));
    let provisioner = prepared(&runner, &raw(&dir, json!({})));

    let err = provisioner
        .provision(&RecordingReporter::default(), offline())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::CommandFailed { code: Some(1) }), "got: {err}");

    let port = port_of(&runner.runs()[0]);
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("port released after failure");
}

#[tokio::test]
async fn test_busy_configured_port_is_bind_error_without_running_command() {
    let dir = TempDir::new().unwrap();
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();
    let runner = MockCommandRunner::exiting(Some(0));
    let provisioner = prepared(&runner, &raw(&dir, json!({ "local_port": port })));

    let err = provisioner
        .provision(&RecordingReporter::default(), offline())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Bind { port: p, .. } if p == port), "got: {err}");
    assert!(runner.runs().is_empty());
}

#[tokio::test]
async fn test_unparsable_host_key_is_key_format_error() {
    let dir = TempDir::new().unwrap();
    let bad_key = dir.path().join("host_key");
    std::fs::write(&bad_key, "not a key\n").unwrap();
    let runner = MockCommandRunner::exiting(Some(0));
    let provisioner = prepared(&runner, &raw(&dir, json!({ "ssh_host_key_file": bad_key })));

    let err = provisioner
        .provision(&RecordingReporter::default(), offline())
        .await
        .unwrap_err();
    match err {
        ProvisionError::KeyFormat { path, .. } => assert_eq!(path, bad_key),
        other => panic!("expected KeyFormat, got {other}"),
    }
    assert!(runner.runs().is_empty());
}

#[tokio::test]
async fn test_provision_can_run_twice() {
    let dir = TempDir::new().unwrap();
    let runner = MockCommandRunner::exiting(Some(0));
    let provisioner = prepared(&runner, &raw(&dir, json!({})));
    for _ in 0..2 {
        provisioner
            .provision(&RecordingReporter::default(), offline())
            .await
            .expect("runs");
    }
    assert_eq!(runner.runs().len(), 2);
}
