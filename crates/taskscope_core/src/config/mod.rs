use crate::contract::StaticContract;
use crate::error::AppError;
use crate::remote::{
    DEFAULT_BASE_URL, DEFAULT_FETCH_LIMIT, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_NAMESPACE,
    Endpoints,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TASKSCOPE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub api_namespace: String,
    /// Use the fixed update shape instead of waiting for an observed one.
    pub static_contract: bool,
    pub fetch_timeout_ms: u64,
    pub fetch_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_namespace: DEFAULT_NAMESPACE.to_string(),
            static_contract: true,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }
}

impl Config {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.base_url, &self.api_namespace)
    }

    pub fn static_contract(&self) -> Option<StaticContract> {
        self.static_contract
            .then(|| StaticContract::new(self.endpoints()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub api_namespace: Option<String>,
    pub static_contract: Option<bool>,
    pub fetch_timeout_ms: Option<u64>,
    pub fetch_limit: Option<u32>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("taskscope")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("taskscope")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

/// Blank or zero values fall back to the defaults.
fn normalize_config(mut config: Config) -> Config {
    let defaults = Config::default();
    if config.base_url.trim().is_empty() {
        config.base_url = defaults.base_url;
    }
    if config.api_namespace.trim().is_empty() {
        config.api_namespace = defaults.api_namespace;
    }
    if config.fetch_timeout_ms == 0 {
        config.fetch_timeout_ms = defaults.fetch_timeout_ms;
    }
    if config.fetch_limit == 0 {
        config.fetch_limit = defaults.fetch_limit;
    }
    config
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(base_url) = overrides.base_url.as_ref() {
        merged.base_url = base_url.clone();
    }
    if let Some(namespace) = overrides.api_namespace.as_ref() {
        merged.api_namespace = namespace.clone();
    }
    if let Some(static_contract) = overrides.static_contract {
        merged.static_contract = static_contract;
    }
    if let Some(timeout) = overrides.fetch_timeout_ms {
        merged.fetch_timeout_ms = timeout;
    }
    if let Some(limit) = overrides.fetch_limit {
        merged.fetch_limit = limit;
    }
    normalize_config(merged)
}
