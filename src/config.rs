use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const ENV_LOG: &str = "LARDER_LOG";
pub const ENV_LOG_FORMAT: &str = "LARDER_LOG_FORMAT";
pub const ENV_LOG_DIR: &str = "LARDER_LOG_DIR";
pub const ENV_HISTORY_LIMIT: &str = "LARDER_HISTORY_LIMIT";
pub const ENV_UNDO_WINDOW_MS: &str = "LARDER_UNDO_WINDOW_MS";
pub const ENV_DEFAULT_LOCATION: &str = "LARDER_DEFAULT_LOCATION";

const CONFIG_INVALID: &str = "CONFIG/INVALID";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
    /// Daily-rolling log files are written here when set.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "larder=info,sqlx=warn".into(),
            format: LogFormat::Pretty,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_location: String,
    pub history_limit: usize,
    pub undo_window_ms: u64,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_location: "Pantry".into(),
            history_limit: 15,
            undo_window_ms: 3_000,
            log: LogConfig::default(),
        }
    }
}

fn invalid(key: &str, value: &str) -> AppError {
    AppError::new(CONFIG_INVALID, format!("Invalid value for {key}."))
        .with_context("key", key)
        .with_context("value", value)
}

impl Config {
    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn from_json_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::new(CONFIG_INVALID, "Could not read the configuration file.")
                .with_context("path", path.display().to_string())
                .with_cause(AppError::from(err.to_string()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            AppError::new(CONFIG_INVALID, "Configuration file is not valid.")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `LARDER_*` overrides read through `lookup`. Blank values are
    /// ignored.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(filter) = get(ENV_LOG) {
            self.log.filter = filter;
        }
        if let Some(format) = get(ENV_LOG_FORMAT) {
            self.log.format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => return Err(invalid(ENV_LOG_FORMAT, &format)),
            };
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            self.log.dir = Some(PathBuf::from(dir));
        }
        if let Some(limit) = get(ENV_HISTORY_LIMIT) {
            self.history_limit = limit
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_HISTORY_LIMIT, &limit))?;
        }
        if let Some(window) = get(ENV_UNDO_WINDOW_MS) {
            self.undo_window_ms = window
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_UNDO_WINDOW_MS, &window))?;
        }
        if let Some(location) = get(ENV_DEFAULT_LOCATION) {
            self.default_location = location.trim().to_string();
        }
        Ok(self)
    }
}
