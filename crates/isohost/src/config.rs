//! Server configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `ISOHOST_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `ISOHOST_RUNTIME__MAX_CONCURRENT_RUNS=4`), then command-line overrides.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use isohost_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ISOHOST_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    Missing(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
    pub runtime: RuntimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12000,
            log_json: false,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Values given on the command line. `None` leaves the layered value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_json: bool,
    pub script_root: Option<PathBuf>,
    pub max_concurrent_runs: Option<usize>,
}

impl ServerConfig {
    /// The provider stack without command-line overrides.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration. A file that was asked for must exist.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.is_file() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
        }
        Self::figment(file)
            .extract()
            .map_err(|e| ConfigError::Invalid(Box::new(e)))
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if overrides.log_json {
            self.log_json = true;
        }
        if let Some(root) = overrides.script_root {
            self.runtime = self.runtime.with_script_root(root);
        }
        if let Some(slots) = overrides.max_concurrent_runs {
            self.runtime = self.runtime.with_max_concurrent_runs(slots);
        }
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
