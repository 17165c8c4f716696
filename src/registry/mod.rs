//! Repository registry: maps project ids to repositories on disk.
//!
//! The orchestrator only reads from the registry. Entries come from the
//! `repositories:` section of `devhost.yaml`.

use crate::config::{Config, RepositoryConfig};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A repository as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Read-only lookup of repositories by project id.
pub trait RepositoryRegistry: Send + Sync {
    /// Fails with [`Error::NotFound`] for unknown ids.
    fn get_repository(&self, id: &str) -> Result<RepositoryRef>;

    /// All repositories, ordered by id.
    fn list_repositories(&self) -> Vec<RepositoryRef>;
}

/// Registry backed by the configuration file.
///
/// Branch names are read from the working tree on every lookup so they
/// follow checkouts made while devhost is running.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    repositories: BTreeMap<String, RepositoryConfig>,
}

impl ConfigRegistry {
    pub fn new(repositories: BTreeMap<String, RepositoryConfig>) -> Self {
        Self { repositories }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.repositories.clone())
    }

    fn to_ref(id: &str, repo: &RepositoryConfig) -> RepositoryRef {
        let branch = if repo.kind == "git" {
            crate::git::current_branch(&repo.path)
        } else {
            None
        };

        RepositoryRef {
            id: id.to_string(),
            name: repo.name.clone().unwrap_or_else(|| id.to_string()),
            path: repo.path.clone(),
            kind: repo.kind.clone(),
            branch,
        }
    }
}

impl RepositoryRegistry for ConfigRegistry {
    fn get_repository(&self, id: &str) -> Result<RepositoryRef> {
        self.repositories
            .get(id)
            .map(|repo| Self::to_ref(id, repo))
            .ok_or_else(|| Error::NotFound(format!("repository '{}'", id)))
    }

    fn list_repositories(&self) -> Vec<RepositoryRef> {
        self.repositories
            .iter()
            .map(|(id, repo)| Self::to_ref(id, repo))
            .collect()
    }
}
