//! Settings file handling

use anyhow::{anyhow, Context, Result};
use pget_types::Settings;
use std::path::{Path, PathBuf};

/// Keys accepted by `config get` and `config set`
pub const KEYS: &[&str] = &[
    "default_segments",
    "default_port",
    "connect_timeout_secs",
    "command_timeout_secs",
    "idle_timeout_secs",
    "remove_partial_on_failure",
    "read_buffer_size",
];

/// Explicit path, else `<config dir>/pget/settings.json`
pub fn settings_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("pget"))
            .unwrap_or_else(|| PathBuf::from(".pget"))
            .join("settings.json")
    })
}

/// Load settings; a missing file means defaults
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
}

pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn get_value(settings: &Settings, key: &str) -> Result<String> {
    let value = match key {
        "default_segments" => settings.default_segments.to_string(),
        "default_port" => settings.default_port.to_string(),
        "connect_timeout_secs" => settings.connect_timeout_secs.to_string(),
        "command_timeout_secs" => settings.command_timeout_secs.to_string(),
        "idle_timeout_secs" => settings.idle_timeout_secs.to_string(),
        "remove_partial_on_failure" => settings.remove_partial_on_failure.to_string(),
        "read_buffer_size" => settings.read_buffer_size.to_string(),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    };
    Ok(value)
}

pub fn set_value(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    let invalid = || format!("Invalid value for {}: {}", key, value);

    match key {
        "default_segments" => {
            let segments: u32 = value.parse().with_context(invalid)?;
            if segments == 0 {
                return Err(anyhow!("default_segments must be at least 1"));
            }
            settings.default_segments = segments;
        }
        "default_port" => settings.default_port = value.parse().with_context(invalid)?,
        "connect_timeout_secs" => {
            settings.connect_timeout_secs = value.parse().with_context(invalid)?
        }
        "command_timeout_secs" => {
            settings.command_timeout_secs = value.parse().with_context(invalid)?
        }
        "idle_timeout_secs" => settings.idle_timeout_secs = value.parse().with_context(invalid)?,
        "remove_partial_on_failure" => {
            settings.remove_partial_on_failure = value.parse().with_context(invalid)?
        }
        "read_buffer_size" => settings.read_buffer_size = value.parse().with_context(invalid)?,
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    }
    Ok(())
}
