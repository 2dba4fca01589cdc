use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use shared::protocol::{FeedPaths, PathLayout};

pub const DEFAULT_CONFIG_FILE: &str = "home-monitor.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub auth_token: Option<String>,
    pub layout: PathLayout,
    pub sensors_path: Option<String>,
    pub devices_path: Option<String>,
    pub historical_path: Option<String>,
    pub poll_interval_ms: u64,
    pub summary_endpoint: Option<String>,
    pub summary_timeout_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "http://127.0.0.1:9000".into(),
            auth_token: None,
            layout: PathLayout::Nested,
            sensors_path: None,
            devices_path: None,
            historical_path: None,
            poll_interval_ms: 2000,
            summary_endpoint: None,
            summary_timeout_ms: 8000,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    /// Paths of the selected layout with any explicit path settings on top.
    pub fn feed_paths(&self) -> FeedPaths {
        let mut paths = self.layout.paths();
        if let Some(path) = &self.sensors_path {
            paths.sensors = path.clone();
        }
        if let Some(path) = &self.devices_path {
            paths.devices = path.clone();
        }
        if let Some(path) = &self.historical_path {
            paths.historical = path.clone();
        }
        paths
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_millis(self.summary_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    auth_token: Option<String>,
    layout: Option<PathLayout>,
    sensors_path: Option<String>,
    devices_path: Option<String>,
    historical_path: Option<String>,
    poll_interval_ms: Option<u64>,
    summary_endpoint: Option<String>,
    summary_timeout_ms: Option<u64>,
    log_filter: Option<String>,
}

/// Defaults, then the config file, then `HOME_MONITOR_*` / `APP__*`
/// environment variables. A missing file is only an error when it was named
/// explicitly.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == ErrorKind::NotFound && config_path.is_none() => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let settings = settings_from(raw.as_deref(), |key| std::env::var(key).ok())
        .with_context(|| format!("invalid settings in '{}'", path.display()))?;
    Ok(settings)
}

fn settings_from(raw: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = raw {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.database_url {
            settings.database_url = v;
        }
        settings.auth_token = file.auth_token.or(settings.auth_token);
        if let Some(v) = file.layout {
            settings.layout = v;
        }
        settings.sensors_path = file.sensors_path.or(settings.sensors_path);
        settings.devices_path = file.devices_path.or(settings.devices_path);
        settings.historical_path = file.historical_path.or(settings.historical_path);
        if let Some(v) = file.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        settings.summary_endpoint = file.summary_endpoint.or(settings.summary_endpoint);
        if let Some(v) = file.summary_timeout_ms {
            settings.summary_timeout_ms = v;
        }
        if let Some(v) = file.log_filter {
            settings.log_filter = v;
        }
    }

    // The prefixed APP__ form wins over the product specific name.
    let var = |name: &str| {
        env(&format!("APP__{name}")).or_else(|| env(&format!("HOME_MONITOR_{name}")))
    };

    if let Some(v) = var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Some(v) = var("LAYOUT") {
        settings.layout = v.parse().map_err(|err: String| anyhow!(err))?;
    }
    if let Some(v) = var("SENSORS_PATH") {
        settings.sensors_path = Some(v);
    }
    if let Some(v) = var("DEVICES_PATH") {
        settings.devices_path = Some(v);
    }
    if let Some(v) = var("HISTORICAL_PATH") {
        settings.historical_path = Some(v);
    }
    if let Some(v) = var("POLL_INTERVAL_MS") {
        settings.poll_interval_ms = v
            .parse()
            .with_context(|| format!("POLL_INTERVAL_MS is not a number: {v}"))?;
    }
    if let Some(v) = var("SUMMARY_ENDPOINT") {
        settings.summary_endpoint = Some(v);
    }
    if let Some(v) = var("SUMMARY_TIMEOUT_MS") {
        settings.summary_timeout_ms = v
            .parse()
            .with_context(|| format!("SUMMARY_TIMEOUT_MS is not a number: {v}"))?;
    }
    if let Some(v) = var("LOG_FILTER") {
        settings.log_filter = v;
    }

    settings.auth_token = settings.auth_token.filter(|token| !token.is_empty());
    settings.summary_endpoint = settings.summary_endpoint.filter(|url| !url.is_empty());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_use_the_nested_layout() {
        let settings = settings_from(None, no_env).expect("settings");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.feed_paths().sensors, "currentReadings/sensors");
        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.summary_timeout(), Duration::from_secs(8));
    }

    #[test]
    fn file_values_override_defaults() {
        let raw = r#"
            database_url = "https://garden.example.com"
            layout = "flat"
            historical_path = "history"
            poll_interval_ms = 500
        "#;
        let settings = settings_from(Some(raw), no_env).expect("settings");
        assert_eq!(settings.database_url, "https://garden.example.com");
        assert_eq!(settings.poll_interval_ms, 500);

        let paths = settings.feed_paths();
        assert_eq!(paths.sensors, "SensorData");
        assert_eq!(paths.devices, "controls");
        assert_eq!(paths.historical, "history");
    }

    #[test]
    fn environment_overrides_file() {
        let raw = r#"database_url = "https://from-file""#;
        let env = env_of(&[
            ("HOME_MONITOR_DATABASE_URL", "https://from-product-env"),
            ("APP__DATABASE_URL", "https://from-app-env"),
            ("HOME_MONITOR_AUTH_TOKEN", "token"),
            ("APP__LAYOUT", "flat"),
        ]);
        let settings = settings_from(Some(raw), env).expect("settings");
        assert_eq!(settings.database_url, "https://from-app-env");
        assert_eq!(settings.auth_token.as_deref(), Some("token"));
        assert_eq!(settings.layout, PathLayout::Flat);
    }

    #[test]
    fn empty_optional_values_are_unset() {
        let env = env_of(&[("APP__AUTH_TOKEN", ""), ("APP__SUMMARY_ENDPOINT", "")]);
        let settings = settings_from(None, env).expect("settings");
        assert_eq!(settings.auth_token, None);
        assert_eq!(settings.summary_endpoint, None);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(settings_from(Some("poll_interval_ms = \"fast\""), no_env).is_err());
        assert!(settings_from(Some("unknown_key = 1"), no_env).is_err());
        assert!(settings_from(None, env_of(&[("APP__LAYOUT", "sideways")])).is_err());
        assert!(settings_from(None, env_of(&[("APP__SUMMARY_TIMEOUT_MS", "soon")])).is_err());
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let temp_root = env::temp_dir().join(format!("home_monitor_config_test_{suffix}"));
        fs::create_dir_all(&temp_root).expect("temp root");

        let missing = temp_root.join("missing.toml");
        assert!(load_settings(Some(&missing)).is_err());

        let present = temp_root.join("home-monitor.toml");
        fs::write(&present, "summary_timeout_ms = 1500\n").expect("write config");
        let settings = load_settings(Some(&present)).expect("settings");
        assert_eq!(settings.summary_timeout_ms, 1500);

        fs::remove_dir_all(temp_root).expect("cleanup");
    }
}
