use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "CLAWMIC";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineConfig {
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            shell: default_shell(),
            database: None,
        }
    }
}

fn default_cache_version() -> String {
    "clawmic-v1.009".to_string()
}

fn default_shell() -> Vec<String> {
    vec![
        "index.html".into(),
        "styles.css".into(),
        "app.js".into(),
        "comic_db.json".into(),
        "about_the_editor.txt".into(),
        "editor_photo.png".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
        }
    }
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(120)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.site.base_url.trim().is_empty() {
        base.site.base_url = other.site.base_url;
    }
    if !other.site.request_timeout.is_zero() {
        base.site.request_timeout = other.site.request_timeout;
    }

    if !other.offline.cache_version.trim().is_empty() {
        base.offline.cache_version = other.offline.cache_version;
    }
    if !other.offline.shell.is_empty() {
        base.offline.shell = other.offline.shell;
    }
    if other.offline.database.is_some() {
        base.offline.database = other.offline.database;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base.logging.level = other.logging.level;
    if other.logging.file.is_some() {
        base.logging.file = other.logging.file;
    }

    if !other.ui.tick_rate.is_zero() {
        base.ui.tick_rate = other.ui.tick_rate;
    }

    base
}

// Env values are applied field by field on top of the merged config so an
// unrelated variable never resets a value that came from the file.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "site.base_url" => cfg.site.base_url = value,
        "site.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.site.request_timeout = duration;
            }
        }
        "offline.cache_version" => cfg.offline.cache_version = value,
        "offline.shell" => {
            cfg.offline.shell = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "offline.database" => cfg.offline.database = Some(PathBuf::from(value)),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "logging.level" => {
            if let Some(level) = LogLevel::parse(&value) {
                cfg.logging.level = level;
            }
        }
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        "ui.tick_rate" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.tick_rate = duration;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clawmic-reader").join("config.yaml"))
}

pub fn default_log_path() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("clawmic-reader").join("clawmic-reader.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("CLAWMIC_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.offline.cache_version, "clawmic-v1.009");
        assert_eq!(cfg.offline.shell.len(), 6);
        assert_eq!(cfg.logging.level, LogLevel::Info);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "site:\n  base_url: https://example.org/clawmic/\noffline:\n  cache_version: clawmic-v2.000\nlogging:\n  level: debug\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("CLAWMIC_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.site.base_url, "https://example.org/clawmic/");
        assert_eq!(cfg.offline.cache_version, "clawmic-v2.000");
        assert_eq!(cfg.offline.shell, default_shell());
        assert_eq!(cfg.logging.level, LogLevel::Debug);
    }

    #[test]
    fn env_overrides() {
        env::set_var("CLAWMIC_TEST_ENV_SITE__BASE_URL", "file:///srv/clawmic/");
        env::set_var("CLAWMIC_TEST_ENV_UI__TICK_RATE", "250ms");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("CLAWMIC_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.site.base_url, "file:///srv/clawmic/");
        assert_eq!(cfg.ui.tick_rate, Duration::from_millis(250));
        env::remove_var("CLAWMIC_TEST_ENV_SITE__BASE_URL");
        env::remove_var("CLAWMIC_TEST_ENV_UI__TICK_RATE");
    }
}
