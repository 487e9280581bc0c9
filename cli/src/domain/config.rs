//! Domain types and field parsers for the provisioner configuration.
//!
//! Nothing here touches the filesystem. Existence
//! checks live in `application::services::config_validator`, which walks the
//! fields below in declaration order.

use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::domain::error::ConfigProblem;

// ── Constants ────────────────────────────────────────────────────────────────

pub const KEY_COMMAND: &str = "command";
pub const KEY_FAB_FILE: &str = "fab_file";
pub const KEY_FAB_TASKS: &str = "fab_tasks";
pub const KEY_HOST_KEY_FILE: &str = "ssh_host_key_file";
pub const KEY_AUTHORIZED_KEY_FILE: &str = "ssh_authorized_key_file";
pub const KEY_LOCAL_PORT: &str = "local_port";
pub const KEY_USER: &str = "user";
pub const KEY_EXTRA_ARGUMENTS: &str = "extra_arguments";
pub const KEY_FAB_ENV_VARS: &str = "fab_env_vars";
pub const KEY_SFTP_COMMAND: &str = "sftp_command";

/// Every recognised key, in the order problems are reported.
pub const VALID_CONFIG_KEYS: &[&str] = &[
    KEY_COMMAND,
    KEY_FAB_FILE,
    KEY_FAB_TASKS,
    KEY_HOST_KEY_FILE,
    KEY_AUTHORIZED_KEY_FILE,
    KEY_LOCAL_PORT,
    KEY_USER,
    KEY_EXTRA_ARGUMENTS,
    KEY_FAB_ENV_VARS,
    KEY_SFTP_COMMAND,
];

/// Keys with this prefix are injected by host orchestrators and ignored.
pub const ORCHESTRATOR_KEY_PREFIX: &str = "packer_";

/// Remote command executed for the `sftp` subsystem.
pub const DEFAULT_SFTP_COMMAND: &str = "/usr/lib/sftp-server -e";

/// User name passed to the automation tool when neither `user` nor `$USER` is set.
pub const FALLBACK_USER: &str = "root";

pub static ENV_VAR_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex")
});

// ── Config schema ────────────────────────────────────────────────────────────

/// Strict, validated provisioner configuration.
///
/// Only produced by the config validator; every path in it existed when
/// validation ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionerConfig {
    /// Resolved path of the automation executable.
    pub command: PathBuf,
    /// Task definition file passed with `-f`.
    pub fab_file: Option<PathBuf>,
    /// Task specification, whitespace separated.
    pub fab_tasks: Option<String>,
    /// Private key the tunnel presents as its host identity.
    pub ssh_host_key_file: PathBuf,
    /// Public key the tunnel accepts from the automation client.
    pub ssh_authorized_key_file: PathBuf,
    /// Fixed tunnel port; `None` selects an ephemeral port.
    pub local_port: Option<u16>,
    /// User name the automation client logs in with.
    pub user: String,
    /// Extra arguments inserted before the task list.
    pub extra_arguments: Vec<String>,
    /// `KEY=VALUE` entries added to the automation command's environment.
    pub fab_env_vars: Vec<String>,
    /// Remote command relayed for the `sftp` subsystem.
    pub sftp_command: String,
}

// ── Field parsers ────────────────────────────────────────────────────────────

/// Reads an optional string field. `null` counts as absent.
///
/// # Errors
///
/// Returns a problem if the value is present but not a string.
pub fn string_field(raw: &Map<String, Value>, key: &str) -> Result<Option<String>, ConfigProblem> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ConfigProblem::new(
            key,
            format!("must be a string (got {})", type_name(other)),
        )),
    }
}

/// Reads an optional list-of-strings field. `null` counts as empty.
///
/// # Errors
///
/// Returns a problem if the value is not an array or holds a non-string.
pub fn string_list_field(raw: &Map<String, Value>, key: &str) -> Result<Vec<String>, ConfigProblem> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ConfigProblem::new(
                    key,
                    format!("entry {i} must be a string (got {})", type_name(other)),
                )),
            })
            .collect(),
        Some(other) => Err(ConfigProblem::new(
            key,
            format!("must be a list of strings (got {})", type_name(other)),
        )),
    }
}

/// Parses `local_port` from a JSON number or a decimal string.
///
/// # Errors
///
/// Returns a reason if the value is not an integer or is outside `1..=65535`.
pub fn parse_local_port(value: &Value) -> Result<u16, String> {
    let parsed: i128 = match value {
        Value::Number(n) => match n.as_i64() {
            Some(v) => i128::from(v),
            None => match n.as_u64() {
                Some(v) => i128::from(v),
                None => return Err(format!("must be an integer (got {n})")),
            },
        },
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| format!("must be an integer (got {s:?})"))?,
        other => return Err(format!("must be an integer (got {})", type_name(other))),
    };
    u16::try_from(parsed)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| format!("must be between 1 and 65535 (got {parsed})"))
}

/// Validates a `KEY=VALUE` environment entry.
///
/// # Errors
///
/// Returns a reason if the entry has no `=` or an invalid variable name.
pub fn check_env_var(entry: &str) -> Result<(), String> {
    let Some((name, _value)) = entry.split_once('=') else {
        return Err(format!("entry {entry:?} must have the form KEY=VALUE"));
    };
    if !ENV_VAR_NAME_RE.is_match(name) {
        return Err(format!("entry {entry:?} has an invalid variable name"));
    }
    Ok(())
}

/// Keys that are neither recognised nor orchestrator-injected, sorted.
#[must_use]
pub fn unknown_keys(raw: &Map<String, Value>) -> Vec<String> {
    let mut unknown: Vec<String> = raw
        .keys()
        .filter(|k| !VALID_CONFIG_KEYS.contains(&k.as_str()))
        .filter(|k| !k.starts_with(ORCHESTRATOR_KEY_PREFIX))
        .cloned()
        .collect();
    unknown.sort();
    unknown
}

/// Splits a task specification into individual task arguments.
#[must_use]
pub fn split_tasks(tasks: &str) -> Vec<String> {
    tasks.split_whitespace().map(str::to_string).collect()
}

/// Returns `true` if `command` names a path rather than a bare program name.
#[must_use]
pub fn is_path_like(command: &str) -> bool {
    command.contains('/') || command.contains(std::path::MAIN_SEPARATOR)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
