use super::reconcile::{self, Liveness, ReconcileReport};
use super::status::{self, InstanceListing, TrackedInstance};
use crate::error::{Error, Result};
use crate::git::{GitStatusEnricher, GitSummary};
use crate::port::{PortPool, PortRecord};
use crate::process::{LiveProcess, StartedInstance, Supervisor};
use crate::registry::{RepositoryRef, RepositoryRegistry};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-project start/stop gate.
type ProjectGate = Arc<tokio::sync::Mutex<()>>;

/// Options for [`Orchestrator::list_instances`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Attach a git change summary to each instance
    pub include_changes: bool,
    /// Release stale records before listing
    pub reconcile: bool,
}

/// Coordinates the port pool, the process supervisor and the repository
/// registry.
///
/// # Concurrency Model
///
/// All methods take `&self` and the orchestrator is cheap to clone, so
/// request handlers can share one instance.
/// - Pool state sits behind a synchronous mutex inside [`PortPool`] that is
///   never held across an `.await`. Spawning and readiness polling happen
///   outside it, so a slow start never stalls unrelated projects.
/// - Starts and stops of one project are serialised through a per-project
///   async gate. Concurrent starts of the same project therefore converge on
///   one process.
/// - The start protocol runs in its own task. A caller that goes away does
///   not abort a spawn halfway; the task still commits or rolls back.
///
/// # Lock Ordering (to prevent deadlocks)
///
/// 1. Project gate (`gates` entry)
/// 2. Pool state (inside [`PortPool`])
/// 3. Store lock (`.lock` in the state directory, taken by pool mutations)
///
/// The `gates` map lock itself is only held while looking up or dropping an
/// entry.
#[derive(Clone)]
pub struct Orchestrator {
    pool: Arc<PortPool>,
    supervisor: Arc<dyn Supervisor>,
    registry: Arc<dyn RepositoryRegistry>,
    gates: Arc<parking_lot::Mutex<HashMap<String, ProjectGate>>>,
}

impl Orchestrator {
    /// Create a builder that wires the orchestrator from a [`crate::Config`].
    pub fn builder() -> crate::orchestrator::OrchestratorBuilder {
        crate::orchestrator::OrchestratorBuilder::new()
    }

    pub fn new(
        pool: PortPool,
        supervisor: Arc<dyn Supervisor>,
        registry: Arc<dyn RepositoryRegistry>,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            supervisor,
            registry,
            gates: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    pub fn registry(&self) -> &dyn RepositoryRegistry {
        self.registry.as_ref()
    }

    /// Start an editor for `project_id`, or return the running one.
    ///
    /// On any failure after a port was reserved, the reservation is released
    /// before the error is returned.
    #[tracing::instrument(skip(self))]
    pub async fn start_instance(&self, project_id: &str) -> Result<StartedInstance> {
        let repository = self.registry.get_repository(project_id)?;

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_start(repository).await });

        task.await.map_err(|e| Error::SpawnFailed {
            project_id: project_id.to_string(),
            reason: format!("start task failed: {}", e),
        })?
    }

    async fn run_start(&self, repository: RepositoryRef) -> Result<StartedInstance> {
        let gate = self.gate(&repository.id);
        let result = {
            let _guard = gate.lock().await;
            self.start_gated(&repository).await
        };
        self.forget_gate(&repository.id, gate);
        result
    }

    async fn start_gated(&self, repository: &RepositoryRef) -> Result<StartedInstance> {
        let project_id = repository.id.as_str();

        if let Some(record) = self.pool.get(project_id) {
            match self.liveness(&record) {
                Liveness::Alive => {
                    debug!(
                        "'{}' already running on port {} (PID {})",
                        project_id, record.port, record.pid
                    );
                    return Ok(self.started_from(&record));
                }
                liveness => {
                    warn!(
                        "Record for '{}' on port {} is stale ({:?}), replacing it",
                        project_id, record.port, liveness
                    );
                    self.pool.release_if_pid(project_id, record.pid)?;
                }
            }
        }

        let port = self.pool.allocate(project_id, &repository.path)?;
        if let Some(record) = self.pool.get(project_id) {
            debug!("'{}' was recorded by another devhost process", project_id);
            return Ok(self.started_from(&record));
        }

        let started = match self
            .supervisor
            .start(project_id, &repository.path, port)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                self.rollback(project_id, port);
                return Err(e);
            }
        };

        let record = PortRecord {
            port,
            pid: started.pid,
            project_id: project_id.to_string(),
            repo_path: repository.path.clone(),
            started_at: started.started_at,
        };
        if let Err(e) = self.pool.commit(record) {
            warn!(
                "Could not record '{}' (PID {}), stopping it: {}",
                project_id, started.pid, e
            );
            if let Err(stop_err) = self.supervisor.stop(started.pid).await {
                warn!("Failed to stop unrecorded PID {}: {}", started.pid, stop_err);
            }
            self.rollback(project_id, port);
            return Err(e);
        }

        info!("Started '{}' on port {} (PID {})", project_id, port, started.pid);
        Ok(started)
    }

    fn started_from(&self, record: &PortRecord) -> StartedInstance {
        StartedInstance {
            pid: record.pid,
            port: record.port,
            url: self.supervisor.instance_url(record.port, &record.repo_path),
            started_at: record.started_at,
        }
    }

    fn rollback(&self, project_id: &str, port: u16) {
        match self.pool.release(project_id) {
            Ok(_) => debug!("Rolled back reservation of port {} for '{}'", port, project_id),
            Err(e) => warn!(
                "Failed to roll back reservation of port {} for '{}': {}",
                port, project_id, e
            ),
        }
    }

    /// Stop the editor for `project_id` and release its port.
    ///
    /// Returns the released record, or `None` when the project is known but
    /// has no instance. Unknown projects fail with [`Error::NotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn stop_instance(&self, project_id: &str) -> Result<Option<PortRecord>> {
        // Records of projects dropped from the configuration can still be stopped
        if self.pool.get(project_id).is_none() {
            self.registry.get_repository(project_id)?;
        }

        let gate = self.gate(project_id);
        let result = {
            let _guard = gate.lock().await;
            self.stop_gated(project_id).await
        };
        self.forget_gate(project_id, gate);
        result
    }

    async fn stop_gated(&self, project_id: &str) -> Result<Option<PortRecord>> {
        let Some(record) = self.pool.get(project_id) else {
            debug!("'{}' has no instance to stop", project_id);
            return Ok(None);
        };

        match self.liveness(&record) {
            Liveness::Alive => self.supervisor.stop(record.pid).await?,
            Liveness::Dead => debug!("PID {} for '{}' already exited", record.pid, project_id),
            Liveness::PidReused => warn!(
                "PID {} for '{}' now belongs to another process, not signalling it",
                record.pid, project_id
            ),
        }

        self.pool.release(project_id)?;
        info!("Stopped '{}', port {} is free", project_id, record.port);
        Ok(Some(record))
    }

    /// Release records whose process is gone and report live editors that
    /// have no record. Untracked editors are never adopted.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let live = self.supervisor.find_running_instances().await?;
        let records = self.pool.all();
        let reserved = self.reserved_ports();

        let plan = reconcile::plan(&records, |r| self.liveness(r), &live, &reserved);

        let mut released = Vec::new();
        for stale in plan.stale {
            // A fresh start may have replaced the record since it was probed
            if self.pool.release_if_pid(&stale.project_id, stale.pid)? {
                warn!(
                    "Released stale record for '{}' on port {} (PID {}, {:?})",
                    stale.project_id, stale.port, stale.pid, stale.reason
                );
                released.push(stale);
            }
        }

        for process in &plan.untracked {
            warn!(
                "Untracked editor on port {} (PID {}){}",
                process.port,
                process.pid,
                process
                    .project_id
                    .as_deref()
                    .map(|id| format!(" claiming project '{}'", id))
                    .unwrap_or_default()
            );
        }

        Ok(ReconcileReport {
            released,
            untracked: plan.untracked,
            tracked: self.pool.all().len(),
            live_total: live.len(),
        })
    }

    /// Tracked instances with liveness, repository metadata and URLs, plus
    /// the live-scan totals that make drift visible.
    #[tracing::instrument(skip(self))]
    pub async fn list_instances(&self, options: ListOptions) -> Result<InstanceListing> {
        if options.reconcile {
            self.reconcile().await?;
        }

        let live = self.supervisor.find_running_instances().await?;

        // Registry lookups open repositories and liveness reads /proc
        let this = self.clone();
        let mut listing = tokio::task::spawn_blocking(move || this.aggregate_blocking(&live))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        if options.include_changes {
            for view in &mut listing.instances {
                view.changes = summarize_quietly(&view.project_id, view.repo_path.clone()).await;
            }
        }

        Ok(listing)
    }

    fn aggregate_blocking(&self, live: &[LiveProcess]) -> InstanceListing {
        let reserved = self.reserved_ports();
        let known: Vec<String> = self
            .registry
            .list_repositories()
            .into_iter()
            .map(|r| r.id)
            .collect();

        let tracked: Vec<TrackedInstance> = self
            .pool
            .all()
            .into_iter()
            .map(|record| TrackedInstance {
                liveness: self.liveness(&record),
                repository: self.registry.get_repository(&record.project_id).ok(),
                url: self.supervisor.instance_url(record.port, &record.repo_path),
                record,
            })
            .collect();

        status::aggregate(
            tracked,
            known.iter().map(String::as_str),
            live,
            &reserved,
            chrono::Utc::now(),
        )
    }

    /// Git change summary for a registered repository.
    pub async fn changes(&self, project_id: &str) -> Result<GitSummary> {
        let repository = self.registry.get_repository(project_id)?;
        tokio::task::spawn_blocking(move || GitStatusEnricher::summarize(&repository.path))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Raw process-table snapshot of editor processes.
    pub async fn scan(&self) -> Result<Vec<LiveProcess>> {
        self.supervisor.find_running_instances().await
    }

    fn liveness(&self, record: &PortRecord) -> Liveness {
        if !self.supervisor.is_running(record.pid) {
            Liveness::Dead
        } else if !self.supervisor.is_same_process(record.pid, record.started_at) {
            Liveness::PidReused
        } else {
            Liveness::Alive
        }
    }

    fn reserved_ports(&self) -> BTreeSet<u16> {
        self.pool
            .snapshot()
            .reservations()
            .map(|(_, r)| r.port)
            .collect()
    }

    fn gate(&self, project_id: &str) -> ProjectGate {
        self.gates
            .lock()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map entry for `project_id` once no other task holds or waits
    /// on its gate.
    fn forget_gate(&self, project_id: &str, gate: ProjectGate) {
        let mut gates = self.gates.lock();
        // Clones are only handed out under the map lock, so the count is exact
        if Arc::strong_count(&gate) == 2 {
            gates.remove(project_id);
        }
    }
}

/// Git summary for a listing entry. Failures are logged and yield `None`.
async fn summarize_quietly(
    project_id: &str,
    repo_path: std::path::PathBuf,
) -> Option<GitSummary> {
    match tokio::task::spawn_blocking(move || GitStatusEnricher::summarize(&repo_path)).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            warn!("No git summary for '{}': {}", project_id, e);
            None
        }
        Err(e) => {
            warn!("Git summary task for '{}' failed: {}", project_id, e);
            None
        }
    }
}
