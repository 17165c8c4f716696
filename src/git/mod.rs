//! Working-tree change summaries for repositories.
//!
//! Per-file statistics are queried one path at a time, so a file whose stats
//! cannot be computed still appears in the listing with zero counts.
//!
//! A repository registered at a subdirectory of a working tree only sees
//! changes below that directory, with paths relative to it.

use crate::error::Result;
use git2::{DiffOptions, Repository, Status, StatusOptions};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// How a path changed. When an entry carries several status flags the
/// first matching kind in declaration order wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Renamed,
    Modified,
}

impl ChangeKind {
    /// Classify a status entry with the precedence added > deleted > renamed > modified.
    ///
    /// Returns `None` for unchanged and ignored entries.
    pub fn classify(status: Status) -> Option<Self> {
        if status.intersects(Status::INDEX_NEW | Status::WT_NEW) {
            Some(ChangeKind::Added)
        } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
            Some(ChangeKind::Deleted)
        } else if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
            Some(ChangeKind::Renamed)
        } else if status.intersects(
            Status::INDEX_MODIFIED
                | Status::WT_MODIFIED
                | Status::INDEX_TYPECHANGE
                | Status::WT_TYPECHANGE
                | Status::CONFLICTED,
        ) {
            Some(ChangeKind::Modified)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSummary {
    pub branch: Option<String>,
    pub changes: Vec<FileChange>,
    pub additions: usize,
    pub deletions: usize,
}

/// Builds [`GitSummary`] values for repository paths.
pub struct GitStatusEnricher;

impl GitStatusEnricher {
    /// Summarise uncommitted changes under `repo_path`.
    ///
    /// Fails only when the repository itself cannot be read.
    pub fn summarize(repo_path: &Path) -> Result<GitSummary> {
        let ScopedRepository { repo, prefix } = ScopedRepository::open(repo_path)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .renames_head_to_index(true)
            .renames_index_to_workdir(true);
        if let Some(prefix) = &prefix {
            opts.pathspec(prefix);
        }

        let statuses = repo.statuses(Some(&mut opts))?;
        let relative = |path: &str| -> Option<String> {
            match &prefix {
                Some(prefix) => path
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(str::to_string),
                None => Some(path.to_string()),
            }
        };

        let mut changes = Vec::new();
        for entry in statuses.iter() {
            let Some(kind) = ChangeKind::classify(entry.status()) else {
                continue;
            };

            let delta = entry.index_to_workdir().or_else(|| entry.head_to_index());
            let new_path = delta
                .as_ref()
                .and_then(|d| d.new_file().path())
                .map(|p| p.to_string_lossy().into_owned())
                .or_else(|| entry.path().map(str::to_string));
            let Some(path) = new_path else {
                continue;
            };

            let Some(shown) = relative(&path) else {
                continue;
            };

            let old_path = match kind {
                ChangeKind::Renamed => entry
                    .head_to_index()
                    .or_else(|| entry.index_to_workdir())
                    .and_then(|d| d.old_file().path().map(|p| p.to_string_lossy().into_owned()))
                    .filter(|old| *old != path)
                    .map(|old| relative(&old).unwrap_or(old)),
                _ => None,
            };

            let (additions, deletions) = match line_stats(&repo, &path) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Could not compute line stats for '{}': {}", path, e);
                    (0, 0)
                }
            };

            changes.push(FileChange {
                path: shown,
                old_path,
                kind,
                additions,
                deletions,
            });
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(GitSummary {
            branch: branch_of(&repo),
            additions: changes.iter().map(|c| c.additions).sum(),
            deletions: changes.iter().map(|c| c.deletions).sum(),
            changes,
        })
    }
}

/// Current branch of the repository containing `repo_path`, if any.
pub fn current_branch(repo_path: &Path) -> Option<String> {
    ScopedRepository::open(repo_path)
        .ok()
        .and_then(|scoped| branch_of(&scoped.repo))
}

/// The repository containing a registered path, and where that path sits
/// inside its working tree.
struct ScopedRepository {
    repo: Repository,
    /// `/`-separated path of the registered directory below the working tree
    /// root; `None` at the root itself
    prefix: Option<String>,
}

impl ScopedRepository {
    fn open(repo_path: &Path) -> Result<Self> {
        let repo = Repository::discover(repo_path)?;

        let prefix = match repo.workdir() {
            Some(workdir) => {
                let workdir = workdir.canonicalize()?;
                let path = repo_path.canonicalize()?;
                path.strip_prefix(&workdir)
                    .ok()
                    .filter(|rel| !rel.as_os_str().is_empty())
                    .map(|rel| {
                        rel.components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/")
                    })
            }
            None => None,
        };

        Ok(Self { repo, prefix })
    }
}

/// Branch shorthand, `HEAD` when detached, or the target of an unborn branch.
fn branch_of(repo: &Repository) -> Option<String> {
    if repo.head_detached().unwrap_or(false) {
        return Some("HEAD".to_string());
    }
    match repo.head() {
        Ok(head) => head.shorthand().map(str::to_string),
        Err(_) => repo
            .find_reference("HEAD")
            .ok()?
            .symbolic_target()?
            .strip_prefix("refs/heads/")
            .map(str::to_string),
    }
}

/// Additions and deletions of `path` between HEAD and the working tree.
///
/// Untracked files are not part of this diff and report `(0, 0)`.
fn line_stats(repo: &Repository, path: &str) -> Result<(usize, usize)> {
    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(_) => None,
    };

    let mut opts = DiffOptions::new();
    opts.pathspec(path).disable_pathspec_match(true);

    let diff = repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?;
    let stats = diff.stats()?;
    Ok((stats.insertions(), stats.deletions()))
}
