//! Shared test fixtures: a fake supervisor and orchestrator wiring.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devhost::config::{PortsConfig, RepositoryConfig};
use devhost::port::{MemoryPortStore, PortPool, PortStore};
use devhost::process::{LiveProcess, StartedInstance, Supervisor};
use devhost::registry::ConfigRegistry;
use devhost::{Error, Orchestrator, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the next `start` call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Succeed,
    SpawnFail,
    Timeout,
}

#[derive(Debug, Clone)]
struct FakeProcess {
    port: u16,
    repo_path: PathBuf,
    project_id: Option<String>,
}

/// In-memory supervisor. Processes are entries in a map; nothing is spawned.
pub struct FakeSupervisor {
    next_pid: AtomicU32,
    processes: Mutex<BTreeMap<u32, FakeProcess>>,
    reused: Mutex<BTreeSet<u32>>,
    behavior: Mutex<StartBehavior>,
    start_delay: Mutex<Duration>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(4000),
            processes: Mutex::new(BTreeMap::new()),
            reused: Mutex::new(BTreeSet::new()),
            behavior: Mutex::new(StartBehavior::Succeed),
            start_delay: Mutex::new(Duration::ZERO),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: StartBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = delay;
    }

    /// Simulate an editor crashing without cleanup.
    pub fn crash(&self, pid: u32) {
        self.processes.lock().remove(&pid);
    }

    /// Simulate the kernel handing `pid` to an unrelated process.
    pub fn mark_reused(&self, pid: u32) {
        self.reused.lock().insert(pid);
    }

    /// Simulate an editor started by hand, outside devhost.
    pub fn launch_manual(&self, port: u16, repo_path: &Path) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.lock().insert(
            pid,
            FakeProcess {
                port,
                repo_path: repo_path.to_path_buf(),
                project_id: None,
            },
        );
        pid
    }

    pub fn live_count(&self) -> usize {
        self.processes.lock().len()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn start(
        &self,
        project_id: &str,
        repo_path: &Path,
        port: u16,
    ) -> Result<StartedInstance> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.behavior.lock();
        match behavior {
            StartBehavior::Succeed => {}
            StartBehavior::SpawnFail => {
                return Err(Error::SpawnFailed {
                    project_id: project_id.to_string(),
                    reason: "could not execute 'code-server'".to_string(),
                })
            }
            StartBehavior::Timeout => {
                return Err(Error::StartTimeout {
                    project_id: project_id.to_string(),
                    port,
                    timeout: Duration::from_secs(10),
                })
            }
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.lock().insert(
            pid,
            FakeProcess {
                port,
                repo_path: repo_path.to_path_buf(),
                project_id: Some(project_id.to_string()),
            },
        );

        Ok(StartedInstance {
            pid,
            port,
            url: self.instance_url(port, repo_path),
            started_at: Utc::now(),
        })
    }

    async fn stop(&self, pid: u32) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.processes.lock().remove(&pid);
        Ok(())
    }

    fn is_running(&self, pid: u32) -> bool {
        self.processes.lock().contains_key(&pid) || self.reused.lock().contains(&pid)
    }

    fn is_same_process(&self, pid: u32, _started_at: DateTime<Utc>) -> bool {
        !self.reused.lock().contains(&pid)
    }

    async fn find_running_instances(&self) -> Result<Vec<LiveProcess>> {
        Ok(self
            .processes
            .lock()
            .iter()
            .map(|(pid, p)| LiveProcess {
                pid: *pid,
                port: p.port,
                repo_path: Some(p.repo_path.clone()),
                project_id: p.project_id.clone(),
                cpu_percent: None,
                memory_bytes: None,
                uptime_secs: None,
                command: format!("code-server --bind-addr 127.0.0.1:{}", p.port),
            })
            .collect())
    }

    fn instance_url(&self, port: u16, repo_path: &Path) -> String {
        devhost::process::supervisor::instance_url("localhost", port, repo_path)
    }
}

/// Registry with one plain (non-git) repository per id, rooted in `base`.
pub fn registry(base: &Path, ids: &[&str]) -> Arc<ConfigRegistry> {
    let repos = ids
        .iter()
        .map(|id| {
            (
                id.to_string(),
                RepositoryConfig {
                    path: base.join(id),
                    kind: "plain".to_string(),
                    name: None,
                },
            )
        })
        .collect();
    Arc::new(ConfigRegistry::new(repos))
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub supervisor: Arc<FakeSupervisor>,
    pub store: Arc<MemoryPortStore>,
    pub dir: tempfile::TempDir,
}

/// Orchestrator over ports `low..=high` with cap `max`, a fake supervisor and
/// an in-memory store.
pub fn harness(low: u16, high: u16, max: usize, ids: &[&str]) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryPortStore::new());
    let supervisor = Arc::new(FakeSupervisor::new());
    let pool = PortPool::open(&PortsConfig::new(low, high, max), store.clone() as Arc<dyn PortStore>)
        .expect("open pool");
    let orchestrator = Orchestrator::new(pool, supervisor.clone(), registry(dir.path(), ids));

    Harness {
        orchestrator,
        supervisor,
        store,
        dir,
    }
}
