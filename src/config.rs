use crate::{PreflightError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Inventory used when the CLI is not given one
    #[serde(default)]
    pub inventory: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Checks allowed in flight at once when sweeping hosts
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

impl PreflightConfig {
    /// `$XDG_CONFIG_HOME/nova/preflight.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nova").join("preflight.toml"))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PreflightConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: PreflightConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PreflightError::ConfigError(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sweep.max_concurrent == 0 {
            return Err(PreflightError::ConfigError(
                "sweep.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(PreflightError::ConfigError(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
