use super::Config;
use crate::error::{Error, Result};

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ports.low == 0 {
            return Err(Error::Validation(
                "ports.low must be greater than 0".to_string(),
            ));
        }

        if self.ports.low > self.ports.high {
            return Err(Error::Validation(format!(
                "ports.low ({}) is greater than ports.high ({})",
                self.ports.low, self.ports.high
            )));
        }

        if self.ports.max_instances == 0 {
            return Err(Error::Validation(
                "ports.max_instances must be at least 1".to_string(),
            ));
        }

        if self.ports.max_instances > self.ports.range_len() {
            tracing::debug!(
                "ports.max_instances ({}) exceeds the range size ({}); the range is the effective limit",
                self.ports.max_instances,
                self.ports.range_len()
            );
        }

        if self.editor.command.trim().is_empty() {
            return Err(Error::Validation(
                "editor.command cannot be empty".to_string(),
            ));
        }

        if !self.editor.args.iter().any(|a| a.contains("{port}")) {
            return Err(Error::Validation(
                "editor.args must contain a {port} placeholder so the editor binds its allocated port"
                    .to_string(),
            ));
        }

        for (id, repo) in &self.repositories {
            if id.trim().is_empty() {
                return Err(Error::Validation(
                    "repository keys cannot be empty".to_string(),
                ));
            }
            if repo.path.as_os_str().is_empty() {
                return Err(Error::Validation(format!(
                    "Repository '{}' has an empty path",
                    id
                )));
            }
        }

        Ok(())
    }
}
