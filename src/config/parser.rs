use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "devhost.yaml";
const ALT_CONFIG_FILE_NAME: &str = "devhost.yml";

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory, then the user
    /// config directory (`~/.config/devhost/devhost.yaml` on Linux).
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        if let Ok(path) = Self::find_config_in_dir(&current_dir) {
            return Ok(path);
        }

        if let Some(user_dir) = dirs::config_dir() {
            let user_config = user_dir.join("devhost").join(CONFIG_FILE_NAME);
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        Err(Error::Config(format!(
            "Could not find {} in current directory, any parent, or the user config directory",
            CONFIG_FILE_NAME
        )))
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(config_path);
        }

        let alt_path = dir.join(ALT_CONFIG_FILE_NAME);
        if alt_path.exists() {
            return Ok(alt_path);
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(format!(
            "Could not find {} in current directory or any parent",
            CONFIG_FILE_NAME
        )))
    }

    /// Load and validate config from file path.
    ///
    /// Relative repository paths are resolved against the config file's directory.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut config = self.parse_config(&content)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            for repo in config.repositories.values_mut() {
                if repo.path.is_relative() {
                    repo.path = base.join(&repo.path);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?;

        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
