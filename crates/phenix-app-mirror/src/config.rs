//! Runtime configuration for phenix-app-mirror
//!
//! Loaded from TOML; every field has a default so a missing file is not an
//! error. Command line flags and environment variables override the file.
//! Default location: /etc/phenix/mirror.toml

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use phenix_app_common::{AppError, AppResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/phenix/mirror.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// minimega binary used to dispatch commands
    #[serde(default = "default_minimega")]
    pub minimega: String,

    /// Name of the cluster host this app runs on
    #[serde(default = "default_headnode")]
    pub headnode: String,

    /// tracing filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_minimega() -> String {
    phenix_app_common::shell::MINIMEGA_CMD.to_string()
}

fn default_headnode() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_default()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            minimega: default_minimega(),
            headnode: default_headnode(),
            log_level: default_log_level(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();

        let config: Self = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                AppError::config(
                    path.display().to_string(),
                    format!("failed to parse config file: {}", e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(AppError::config(
                    path.display().to_string(),
                    format!("failed to read config file: {}", e),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Applies values given on the command line or in the environment.
    pub fn with_overrides(
        mut self,
        minimega: Option<String>,
        headnode: Option<String>,
        log_level: Option<String>,
    ) -> Self {
        if let Some(minimega) = minimega {
            self.minimega = minimega;
        }

        if let Some(headnode) = headnode {
            self.headnode = headnode;
        }

        if let Some(log_level) = log_level {
            self.log_level = log_level;
        }

        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.minimega.trim().is_empty() {
            return Err(AppError::config("minimega", "must not be empty"));
        }

        if self.log_level.trim().is_empty() {
            return Err(AppError::config("log_level", "must not be empty"));
        }

        Ok(())
    }
}
