//! Configuration module for the YAML settings file.
//!
//! The file is read once at startup. Everything in it is read-only afterward.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! secret: s3cr3t
//! settings:
//!   - refs: [refs/heads/main]
//!     scripts: [/opt/deploy/pull.sh, /opt/deploy/restart.sh]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::scripts::ScriptTable;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Application configuration loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host or address to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the web server to listen on. 0 picks a free port.
    #[serde(default)]
    pub port: u16,

    /// Shared secret for HMAC signature verification. Empty disables it.
    #[serde(default)]
    pub secret: String,

    /// Groups of refs and the scripts they trigger
    #[serde(default)]
    pub settings: Vec<Setting>,

    /// Upper bound on a buffered request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// One settings group: every ref in `refs` runs all of `scripts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Setting {
    #[serde(default)]
    pub refs: Vec<String>,

    #[serde(default)]
    pub scripts: Vec<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Flatten the settings groups into a ref → scripts table.
    pub fn script_table(&self) -> ScriptTable {
        ScriptTable::from_settings(&self.settings)
    }

    /// Address string suitable for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether incoming requests must carry a valid signature.
    pub fn signature_enabled(&self) -> bool {
        !self.secret.is_empty()
    }
}
