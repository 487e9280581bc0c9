//! Validate a raw configuration bag against the host.
//!
//! Converts the loosely-typed configuration bag into a [`ProvisionerConfig`].
//! Every field is checked before returning; the error lists all problems in
//! field declaration order followed by unknown keys.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::application::ports::HostEnvironment;
use crate::domain::config::{
    self, DEFAULT_SFTP_COMMAND, FALLBACK_USER, KEY_AUTHORIZED_KEY_FILE, KEY_COMMAND,
    KEY_EXTRA_ARGUMENTS, KEY_FAB_ENV_VARS, KEY_FAB_FILE, KEY_FAB_TASKS, KEY_HOST_KEY_FILE,
    KEY_LOCAL_PORT, KEY_SFTP_COMMAND, KEY_USER, ProvisionerConfig,
};
use crate::domain::error::{ConfigError, ConfigProblem};

/// Validate `raw` against the host environment.
///
/// Only existence and permission checks touch the filesystem; no file
/// contents are read.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] carrying every problem found.
pub fn validate_config(
    raw: &Map<String, Value>,
    env: &impl HostEnvironment,
) -> Result<ProvisionerConfig, ConfigError> {
    let mut problems: Vec<ConfigProblem> = Vec::new();

    let command = required_string(raw, KEY_COMMAND, &mut problems)
        .and_then(|cmd| resolve_command(&cmd, env, &mut problems));

    let fab_file = optional_string(raw, KEY_FAB_FILE, &mut problems)
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    if let Some(path) = &fab_file
        && !env.exists(path)
    {
        problems.push(missing_file(KEY_FAB_FILE, path));
    }

    let fab_tasks = optional_string(raw, KEY_FAB_TASKS, &mut problems)
        .filter(|s| !s.trim().is_empty());
    if fab_file.is_none() && fab_tasks.is_none() {
        problems.push(ConfigProblem::new(
            KEY_FAB_TASKS,
            format!("at least one of {KEY_FAB_FILE} or {KEY_FAB_TASKS} must be set"),
        ));
    }

    let ssh_host_key_file = required_existing_path(raw, KEY_HOST_KEY_FILE, env, &mut problems);
    let ssh_authorized_key_file =
        required_existing_path(raw, KEY_AUTHORIZED_KEY_FILE, env, &mut problems);

    let local_port = match raw.get(KEY_LOCAL_PORT) {
        None | Some(Value::Null) => None,
        Some(value) => match config::parse_local_port(value) {
            Ok(port) => Some(port),
            Err(reason) => {
                problems.push(ConfigProblem::new(KEY_LOCAL_PORT, reason));
                None
            }
        },
    };

    let user = match optional_string(raw, KEY_USER, &mut problems) {
        Some(user) if user.trim().is_empty() => {
            problems.push(ConfigProblem::new(KEY_USER, "must not be empty"));
            String::new()
        }
        Some(user) => user,
        None => env
            .current_user()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| FALLBACK_USER.to_string()),
    };

    let extra_arguments = string_list(raw, KEY_EXTRA_ARGUMENTS, &mut problems);

    let fab_env_vars = string_list(raw, KEY_FAB_ENV_VARS, &mut problems);
    for entry in &fab_env_vars {
        if let Err(reason) = config::check_env_var(entry) {
            problems.push(ConfigProblem::new(KEY_FAB_ENV_VARS, reason));
        }
    }

    let sftp_command = match optional_string(raw, KEY_SFTP_COMMAND, &mut problems) {
        Some(cmd) if cmd.trim().is_empty() => {
            problems.push(ConfigProblem::new(KEY_SFTP_COMMAND, "must not be empty"));
            String::new()
        }
        Some(cmd) => cmd,
        None => DEFAULT_SFTP_COMMAND.to_string(),
    };

    for key in config::unknown_keys(raw) {
        problems.push(ConfigProblem::new(key, "unknown configuration key"));
    }

    match (command, ssh_host_key_file, ssh_authorized_key_file) {
        (Some(command), Some(ssh_host_key_file), Some(ssh_authorized_key_file))
            if problems.is_empty() =>
        {
            Ok(ProvisionerConfig {
                command,
                fab_file,
                fab_tasks,
                ssh_host_key_file,
                ssh_authorized_key_file,
                local_port,
                user,
                extra_arguments,
                fab_env_vars,
                sftp_command,
            })
        }
        _ => Err(ConfigError::Invalid { problems }),
    }
}

fn optional_string(
    raw: &Map<String, Value>,
    key: &str,
    problems: &mut Vec<ConfigProblem>,
) -> Option<String> {
    config::string_field(raw, key).unwrap_or_else(|problem| {
        problems.push(problem);
        None
    })
}

fn required_string(
    raw: &Map<String, Value>,
    key: &str,
    problems: &mut Vec<ConfigProblem>,
) -> Option<String> {
    match config::string_field(raw, key) {
        Ok(Some(value)) if !value.trim().is_empty() => Some(value),
        Ok(_) => {
            problems.push(ConfigProblem::new(key, "is required"));
            None
        }
        Err(problem) => {
            problems.push(problem);
            None
        }
    }
}

fn string_list(
    raw: &Map<String, Value>,
    key: &str,
    problems: &mut Vec<ConfigProblem>,
) -> Vec<String> {
    config::string_list_field(raw, key).unwrap_or_else(|problem| {
        problems.push(problem);
        Vec::new()
    })
}

fn required_existing_path(
    raw: &Map<String, Value>,
    key: &str,
    env: &impl HostEnvironment,
    problems: &mut Vec<ConfigProblem>,
) -> Option<PathBuf> {
    let path = PathBuf::from(required_string(raw, key, problems)?);
    if env.exists(&path) {
        Some(path)
    } else {
        problems.push(missing_file(key, &path));
        None
    }
}

fn resolve_command(
    command: &str,
    env: &impl HostEnvironment,
    problems: &mut Vec<ConfigProblem>,
) -> Option<PathBuf> {
    if !config::is_path_like(command) {
        let found = env.find_executable(command);
        if found.is_none() {
            problems.push(ConfigProblem::new(
                KEY_COMMAND,
                format!("{command:?} was not found in PATH"),
            ));
        }
        return found;
    }

    let path = PathBuf::from(command);
    if !env.exists(&path) {
        problems.push(missing_file(KEY_COMMAND, &path));
        None
    } else if !env.is_executable(&path) {
        problems.push(ConfigProblem::new(
            KEY_COMMAND,
            format!("{} is not an executable file", path.display()),
        ));
        None
    } else {
        Some(path)
    }
}

fn missing_file(key: &str, path: &Path) -> ConfigProblem {
    ConfigProblem::new(key, format!("{} does not exist", path.display()))
}
