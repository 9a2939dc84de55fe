//! Warden Configuration
//!
//! Loads and saves the runtime configuration from `~/.warden/warden.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_config, WardenConfig};

/// Config file name within the warden directory.
const CONFIG_FILENAME: &str = "warden.json";

/// Returns the warden state directory: `~/.warden`.
pub fn get_warden_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".warden")
}

/// Returns the full path to the config file: `~/.warden/warden.json`.
pub fn get_config_path() -> PathBuf {
    get_warden_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, merging missing fields with defaults.
///
/// Returns `None` if the config file does not exist or cannot be parsed.
pub fn load_config() -> Option<WardenConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: WardenConfig = serde_json::from_str(&contents).ok()?;

    let defaults = default_config();

    if config.db_path.is_empty() {
        config.db_path = defaults.db_path;
    }
    if config.classifier_api_url.is_empty() {
        config.classifier_api_url = defaults.classifier_api_url;
    }
    if config.classifier_model.is_empty() {
        config.classifier_model = defaults.classifier_model;
    }
    if config.classifier_timeout_secs == 0 {
        config.classifier_timeout_secs = defaults.classifier_timeout_secs;
    }
    if config.retention_days == 0 {
        config.retention_days = defaults.retention_days;
    }
    if config.monitor.sample_interval_secs == 0 {
        config.monitor.sample_interval_secs = defaults.monitor.sample_interval_secs;
    }
    if config.monitor.sweep_schedule.is_empty() {
        config.monitor.sweep_schedule = defaults.monitor.sweep_schedule;
    }

    Some(config)
}

/// Save the config to `~/.warden/warden.json`.
///
/// Creates the warden directory with mode 0o700 if it does not exist.
/// The config file is written with mode 0o600 since it holds the
/// classifier API key.
pub fn save_config(config: &WardenConfig) -> Result<()> {
    let dir = get_warden_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create warden directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = default_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WardenConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.social.block_threshold, config.social.block_threshold);
        assert_eq!(
            parsed.monitor.sweep_schedule,
            config.monitor.sweep_schedule
        );
    }
}
