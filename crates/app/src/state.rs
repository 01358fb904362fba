use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::PathBuf};

use common::prelude::IvPolicy;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "tether";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STORE_FILE_NAME: &str = "store.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files (stderr only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Hostname -> SPKI pins applied by `fetch` when no --pin is given
    #[serde(default)]
    pub pins: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            transport: TransportConfig::default(),
            pins: BTreeMap::new(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connect/read/write timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Log a curl rendering of every request
    #[serde(default)]
    pub logger_enabled: bool,
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            logger_enabled: false,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Use a random IV for stored values
    #[serde(default = "default_randomize_iv")]
    pub randomize_iv: bool,
    /// At-rest key; the device key is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

fn default_randomize_iv() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            randomize_iv: default_randomize_iv(),
            key: None,
        }
    }
}

impl StorageConfig {
    pub fn iv_policy(&self) -> IvPolicy {
        IvPolicy::from_randomize(self.randomize_iv)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the tether directory (~/.tether)
    pub tether_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Path to the secure store file
    pub store_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the tether directory path (custom or default ~/.tether)
    pub fn tether_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Path of the secure store, whether or not the directory exists yet
    pub fn store_path(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        Ok(Self::tether_dir(custom_path)?.join(STORE_FILE_NAME))
    }

    /// Initialize a new tether state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let tether_dir = Self::tether_dir(custom_path)?;

        if tether_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&tether_dir)?;

        let config = config.unwrap_or_default();
        let config_path = tether_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // The store file is created on first write
        let store_path = tether_dir.join(STORE_FILE_NAME);

        Ok(Self {
            tether_dir,
            config_path,
            store_path,
            config,
        })
    }

    /// Load existing state from the tether directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let tether_dir = Self::tether_dir(custom_path)?;

        if !tether_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = tether_dir.join(CONFIG_FILE_NAME);
        let store_path = tether_dir.join(STORE_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            tether_dir,
            config_path,
            store_path,
            config,
        })
    }

    /// Load the config, falling back to defaults when the directory or file is missing
    ///
    /// A config file that exists but does not parse is still an error.
    pub fn load_config_or_default(custom_path: Option<PathBuf>) -> Result<AppConfig, StateError> {
        match Self::load(custom_path) {
            Ok(state) => Ok(state.config),
            Err(StateError::NotInitialized) | Err(StateError::MissingFile(_)) => {
                Ok(AppConfig::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("tether directory not initialized. Run 'tether init' first")]
    NotInitialized,

    #[error("tether directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
