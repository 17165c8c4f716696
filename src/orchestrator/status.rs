//! Instance listings: pool records merged with liveness, repository
//! metadata and URL slugs.

use super::reconcile::{untracked_processes, Liveness};
use crate::git::GitSummary;
use crate::port::PortRecord;
use crate::process::LiveProcess;
use crate::registry::RepositoryRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// URL-safe form of a project id: characters outside `[A-Za-z0-9_-]` are
/// dropped and the rest lower-cased.
pub fn slugify(project_id: &str) -> String {
    project_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Slugs shared by more than one identity, with those identities sorted.
///
/// Colliding identities are reported side by side, never merged. Picking
/// which one a URL routes to is left to the caller.
pub fn slug_collisions<'a, I>(project_ids: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut by_slug: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for id in project_ids {
        by_slug.entry(slugify(id)).or_default().insert(id.to_string());
    }
    by_slug
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(slug, ids)| (slug, ids.into_iter().collect()))
        .collect()
}

/// One tracked instance as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub project_id: String,
    pub repository: Option<RepositoryRef>,
    pub port: u16,
    pub pid: u32,
    pub repo_path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Seconds since start, only while running
    pub uptime: Option<i64>,
    pub running: bool,
    pub slug: String,
    pub url: String,
    /// Other identities with the same slug
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slug_shared_with: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<GitSummary>,
}

/// Result of listing instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceListing {
    /// Sorted by port
    pub instances: Vec<InstanceView>,
    /// Number of pool records
    pub tracked: usize,
    /// Records whose process is alive
    pub running: usize,
    /// Editor processes in the process table, tracked or not
    pub live_total: usize,
    /// Live editors with no record
    pub untracked: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub slug_collisions: BTreeMap<String, Vec<String>>,
}

/// Everything the aggregator needs to know about one record.
#[derive(Debug, Clone)]
pub struct TrackedInstance {
    pub record: PortRecord,
    pub liveness: Liveness,
    pub repository: Option<RepositoryRef>,
    pub url: String,
}

/// Build a listing.
///
/// `known_ids` are identities that can appear in URLs besides the tracked
/// ones (registered repositories); they take part in collision detection.
pub fn aggregate<'a, I>(
    tracked: Vec<TrackedInstance>,
    known_ids: I,
    live: &[LiveProcess],
    reserved_ports: &BTreeSet<u16>,
    now: DateTime<Utc>,
) -> InstanceListing
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids: Vec<String> = tracked.iter().map(|t| t.record.project_id.clone()).collect();
    ids.extend(known_ids.into_iter().map(str::to_string));
    let collisions = slug_collisions(ids.iter().map(String::as_str));

    let held_ports: BTreeSet<u16> = tracked
        .iter()
        .filter(|t| t.liveness.is_alive())
        .map(|t| t.record.port)
        .collect();
    let untracked = untracked_processes(live, &held_ports, reserved_ports).len();

    let mut instances: Vec<InstanceView> = tracked
        .into_iter()
        .map(|t| {
            let slug = slugify(&t.record.project_id);
            let slug_shared_with = collisions
                .get(&slug)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| **id != t.record.project_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let running = t.liveness.is_alive();

            InstanceView {
                uptime: running.then(|| (now - t.record.started_at).num_seconds().max(0)),
                project_id: t.record.project_id,
                repository: t.repository,
                port: t.record.port,
                pid: t.record.pid,
                repo_path: t.record.repo_path,
                started_at: t.record.started_at,
                running,
                slug,
                url: t.url,
                slug_shared_with,
                changes: None,
            }
        })
        .collect();
    instances.sort_by_key(|v| v.port);

    InstanceListing {
        tracked: instances.len(),
        running: instances.iter().filter(|v| v.running).count(),
        live_total: live.len(),
        untracked,
        slug_collisions: collisions,
        instances,
    }
}
