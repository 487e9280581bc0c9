//! Command implementations

pub mod provision;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

/// Load a YAML or JSON configuration file into the raw key/value bag.
///
/// An empty file yields an empty bag, which validation then rejects.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML, or its
/// top level is not a mapping.
pub fn load_config_file(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => bail!("config file {} must contain a mapping", path.display()),
    }
}
