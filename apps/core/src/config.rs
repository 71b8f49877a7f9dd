use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 0 means one per CPU
    pub max_threads: usize,
    pub heartbeat_interval_ms: u64,
    pub tag_db_path: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub php_file_extensions: Vec<String>,
    pub log_dir: PathBuf,
    pub log_level: String,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let base = stable_app_data_dir();
        Self {
            max_threads: 0,
            heartbeat_interval_ms: 500,
            tag_db_path: base.join("tags.sqlite3"),
            source_dirs: Vec::new(),
            php_file_extensions: vec!["php".to_string(), "inc".to_string()],
            log_dir: base.join("logs"),
            log_level: "info".to_string(),
            config_path: base.join(CONFIG_FILE_NAME),
        }
    }
}

impl Config {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}

pub fn stable_app_data_dir() -> PathBuf {
    std::env::temp_dir().join("phpdesk")
}

pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| stable_app_data_dir().join(CONFIG_FILE_NAME));

    let mut config = match std::fs::read_to_string(&path) {
        Ok(raw) => toml::from_str::<Config>(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    config.config_path = path;
    validate(&config)?;
    Ok(config)
}

pub fn save(config: &Config) -> Result<(), ConfigError> {
    let raw = toml::to_string_pretty(config)?;
    if let Some(parent) = config.config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&config.config_path, raw).map_err(|source| ConfigError::Write {
        path: config.config_path.clone(),
        source,
    })
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if !(10..=60_000).contains(&cfg.heartbeat_interval_ms) {
        return Err(ConfigError::Invalid(
            "heartbeat_interval_ms must be between 10 and 60000".into(),
        ));
    }

    if cfg.max_threads > 256 {
        return Err(ConfigError::Invalid("max_threads must be at most 256".into()));
    }

    if cfg.tag_db_path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("tag_db_path is required".into()));
    }

    if cfg.php_file_extensions.iter().all(|ext| ext.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "php_file_extensions needs at least one extension".into(),
        ));
    }

    Ok(())
}
