//! Configuration loading and root folder resolution

use crate::db::init::DatabaseOptions;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the data root folder
pub const ROOT_FOLDER_ENV: &str = "SENSORHUB_ROOT";

/// Service settings read from the TOML config file
///
/// Every key is optional; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Data root folder (overridden by CLI and environment)
    pub root_folder: Option<PathBuf>,
    /// Database file name, relative to the root folder
    pub database_file: String,
    pub bind_address: String,
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
    /// Deadline applied to requests that do not carry their own (0 = none)
    pub default_deadline_ms: u64,
    /// Retries after a migration conflict before the ingestion call fails
    pub migration_lock_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_file: "sensorhub.db".to_string(),
            bind_address: "127.0.0.1:5780".to_string(),
            busy_timeout_ms: 5000,
            max_connections: 10,
            default_deadline_ms: 10_000,
            migration_lock_retries: 1,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text and check value ranges
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit path, or from the platform config file if present
    ///
    /// A missing platform config file is not an error: defaults are used.
    /// An explicit path that cannot be read is.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => match find_config_file() {
                Some(path) => path,
                None => {
                    info!("No config file found, using default settings");
                    return Ok(Settings::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Cannot read config file {}: {}", path.display(), e)))?;
        let settings = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.database_file.trim().is_empty() {
            return Err(Error::Config("database_file must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "bind_address '{}' is not a socket address",
                self.bind_address
            )));
        }
        Ok(())
    }

    /// Database file path under `root_folder`
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        root_folder.join(&self.database_file)
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.max_connections,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str, settings: &Settings) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
        warn!("{} is set but empty, ignoring", env_var_name);
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = &settings.root_folder {
        return root_folder.clone();
    }

    // Priority 4: OS-dependent default
    default_root_folder()
}

/// Platform config file, user config before system config
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("sensorhub").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/sensorhub/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/sensorhub (or /var/lib/sensorhub for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("sensorhub"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sensorhub"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("sensorhub"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sensorhub"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("sensorhub"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sensorhub"))
    } else {
        PathBuf::from("./sensorhub_data")
    }
}
