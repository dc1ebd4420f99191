use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_load_info_on_start")]
    pub load_info_on_start: bool,
    #[serde(default)]
    pub script: ScriptConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptConfig {
    #[serde(default = "default_script_path")]
    pub path: PathBuf,
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: default_script_path(),
            shell: default_shell(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml_str(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_display,
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }

        validate_script(&self.script)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_script(cfg: &ScriptConfig) -> Result<(), ConfigError> {
    if cfg.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "script.path must not be empty".to_string(),
        ));
    }
    if cfg.shell.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "script.shell must not be empty".to_string(),
        ));
    }
    if let Some(dir) = &cfg.working_dir {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "script.working_dir must not be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

const fn default_load_info_on_start() -> bool {
    true
}

fn default_script_path() -> PathBuf {
    PathBuf::from("./hidpi.sh")
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/bash")
}
