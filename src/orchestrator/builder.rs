use super::Orchestrator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::port::{JsonPortStore, NoopPortStore, PortPool, PortStore};
use crate::process::{ProcessSupervisor, Supervisor, SupervisorSettings};
use crate::registry::{ConfigRegistry, RepositoryRegistry};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for constructing an `Orchestrator` with a fluent API.
///
/// Defaults wire the production collaborators from the configuration:
/// a [`JsonPortStore`] in the state directory, a [`ProcessSupervisor`] for
/// the configured editor and a [`ConfigRegistry`]. Each can be replaced.
///
/// # Example
///
/// ```no_run
/// use devhost::{Orchestrator, Parser};
/// use std::path::PathBuf;
///
/// # fn example() -> Result<(), devhost::Error> {
/// let config = Parser::new().load_config("devhost.yaml")?;
/// let orchestrator = Orchestrator::builder()
///     .config(config)
///     .work_dir(PathBuf::from("."))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: Option<Config>,
    work_dir: Option<PathBuf>,
    store: Option<Arc<dyn PortStore>>,
    supervisor: Option<Arc<dyn Supervisor>>,
    registry: Option<Arc<dyn RepositoryRegistry>>,
    ephemeral: bool,
}

impl OrchestratorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: None,
            work_dir: None,
            store: None,
            supervisor: None,
            registry: None,
            ephemeral: false,
        }
    }

    /// Set the configuration.
    ///
    /// This is required to build the orchestrator.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory the state directory is resolved against, normally the one
    /// holding `devhost.yaml`.
    ///
    /// If not set, defaults to the current directory (".").
    pub fn work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }

    /// Persist pool state through `store` instead of `ports.json`.
    pub fn store(mut self, store: Arc<dyn PortStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn RepositoryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Keep pool state in memory only. Ignored when a store is set.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Build the orchestrator, loading persisted pool state.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Config is not set
    /// - The state directory cannot be created or its state file is corrupt
    pub fn build(self) -> Result<Orchestrator> {
        let config = self
            .config
            .ok_or_else(|| Error::Validation("config is required".to_string()))?;
        let work_dir = self.work_dir.unwrap_or_else(|| PathBuf::from("."));

        let store: Arc<dyn PortStore> = match self.store {
            Some(store) => store,
            None if self.ephemeral => Arc::new(NoopPortStore),
            None => Arc::new(JsonPortStore::open(&config.state_dir_in(&work_dir))?),
        };
        let pool = PortPool::open(&config.ports, store)?;

        let supervisor = self.supervisor.unwrap_or_else(|| {
            Arc::new(ProcessSupervisor::new(SupervisorSettings::from_config(
                &config.editor,
            )))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ConfigRegistry::from_config(&config)));

        Ok(Orchestrator::new(pool, supervisor, registry))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_config() {
        let result = OrchestratorBuilder::new().build();
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("config"));
        }
    }

    #[test]
    fn test_builder_creates_state_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let orchestrator = OrchestratorBuilder::new()
            .config(Config::default())
            .work_dir(temp_dir.path().to_path_buf())
            .build()
            .expect("build");

        assert!(temp_dir.path().join(".devhost").join("ports.json").exists());
        assert_eq!(orchestrator.pool().free_ports().len(), 12);
    }

    #[test]
    fn test_ephemeral_builder_writes_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        OrchestratorBuilder::new()
            .config(Config::default())
            .work_dir(temp_dir.path().to_path_buf())
            .ephemeral(true)
            .build()
            .expect("build");

        assert!(!temp_dir.path().join(".devhost").exists());
    }
}
