//! Spawning, probing and terminating editor-server processes.

use super::scan::{scan_processes, LiveProcess, PROJECT_ENV_MARKER};
use super::{is_process_running, pid_exists};
use crate::config::EditorConfig;
use crate::error::{validate_pid, validate_pid_start_time, Error, Result};
use crate::healthcheck::{wait_until_ready, Readiness, TcpChecker};
use crate::port::PortConflict;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, killpg, Signal};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Upper bound on a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// How often `stop` checks whether a process without a handle has exited.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedInstance {
    pub pid: u32,
    pub port: u16,
    pub url: String,
    pub started_at: DateTime<Utc>,
}

/// Launches and supervises editor processes.
///
/// The orchestrator only talks to this trait, so tests can swap in a fake
/// that never touches the process table.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Spawn an editor for `repo_path` bound to `port` and wait until it
    /// accepts connections. On timeout the process is killed before
    /// [`Error::StartTimeout`] is returned.
    async fn start(&self, project_id: &str, repo_path: &Path, port: u16)
        -> Result<StartedInstance>;

    /// Terminate `pid` gracefully, escalating after the grace period.
    /// Stopping a pid that no longer exists succeeds.
    async fn stop(&self, pid: u32) -> Result<()>;

    /// Liveness probe based on the process table.
    fn is_running(&self, pid: u32) -> bool;

    /// Whether `pid` is still the process recorded at `started_at`.
    ///
    /// Returns true when this cannot be determined.
    fn is_same_process(&self, _pid: u32, _started_at: DateTime<Utc>) -> bool {
        true
    }

    /// Editor processes currently running on this host, tracked or not.
    async fn find_running_instances(&self) -> Result<Vec<LiveProcess>>;

    /// URL under which an instance on `port` serving `repo_path` is reachable.
    fn instance_url(&self, port: u16, repo_path: &Path) -> String;
}

/// Settings for [`ProcessSupervisor`], resolved from [`EditorConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub command: String,
    pub args: Vec<String>,
    pub signature: String,
    pub public_host: String,
    pub startup_timeout: Duration,
    pub readiness_interval: Duration,
    pub grace_period: Duration,
    pub verify_start_time: bool,
}

impl SupervisorSettings {
    pub fn from_config(editor: &EditorConfig) -> Self {
        Self {
            command: editor.command.clone(),
            args: editor.args.clone(),
            signature: editor.get_signature(),
            public_host: editor.public_host.clone(),
            startup_timeout: editor.get_startup_timeout(),
            readiness_interval: editor.get_readiness_interval(),
            grace_period: editor.get_grace_period(),
            verify_start_time: editor.verify_start_time,
        }
    }
}

/// Substitute `{port}`, `{path}` and `{project}` in editor arguments.
pub fn expand_args(args: &[String], port: u16, repo_path: &Path, project_id: &str) -> Vec<String> {
    let port = port.to_string();
    let path = repo_path.to_string_lossy();
    args.iter()
        .map(|arg| {
            arg.replace("{port}", &port)
                .replace("{path}", &path)
                .replace("{project}", project_id)
        })
        .collect()
}

/// Build `http://{host}:{port}/?folder={repo_path}`.
pub fn instance_url(public_host: &str, port: u16, repo_path: &Path) -> String {
    match url::Url::parse(&format!("http://{}:{}/", public_host, port)) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("folder", &repo_path.to_string_lossy());
            url.to_string()
        }
        Err(e) => {
            debug!("Could not build URL for host '{}': {}", public_host, e);
            format!(
                "http://{}:{}/?folder={}",
                public_host,
                port,
                repo_path.display()
            )
        }
    }
}

/// [`Supervisor`] backed by real child processes.
///
/// Each editor runs in its own process group so that stopping it also stops
/// the helpers it forks. Handles of children spawned by this supervisor are
/// kept so exited editors are reaped instead of lingering as zombies.
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    children: parking_lot::Mutex<HashMap<u32, Child>>,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            children: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    fn spawn_editor(&self, project_id: &str, repo_path: &Path, port: u16) -> Result<Child> {
        let args = expand_args(&self.settings.args, port, repo_path, project_id);
        debug!(
            "Spawning '{}' for '{}' in {:?}: {:?}",
            self.settings.command, project_id, repo_path, args
        );

        let mut cmd = Command::new(&self.settings.command);
        cmd.args(&args)
            .current_dir(repo_path)
            .env(PROJECT_ENV_MARKER, project_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // The editor must outlive a devhost CLI invocation
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| Error::SpawnFailed {
            project_id: project_id.to_string(),
            reason: format!("could not execute '{}': {}", self.settings.command, e),
        })
    }

    /// SIGKILL the editor's process group after a failed start and reap it.
    async fn kill_failed_start(&self, pid: u32, mut child: Child) {
        if let Ok(nix_pid) = validate_pid(pid) {
            let _ = killpg(nix_pid, Signal::SIGKILL).or_else(|_| signal::kill(nix_pid, Signal::SIGKILL));
        }
        if tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .is_err()
        {
            warn!("Editor process {} did not exit after SIGKILL", pid);
        }
    }

    /// Process group to signal for `pid`, never our own.
    #[cfg(unix)]
    fn signal_target_group(pid: nix::unistd::Pid) -> Option<nix::unistd::Pid> {
        let pgid = nix::unistd::getpgid(Some(pid)).ok()?;
        if pgid.as_raw() <= 0 || pgid == nix::unistd::getpgrp() {
            return None;
        }
        Some(pgid)
    }

    fn send(pid: nix::unistd::Pid, group: Option<nix::unistd::Pid>, sig: Signal) -> nix::Result<()> {
        match group {
            Some(pgid) => killpg(pgid, sig).or_else(|_| signal::kill(pid, sig)),
            None => signal::kill(pid, sig),
        }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    #[tracing::instrument(skip(self, project_id, repo_path), fields(project.id = %project_id))]
    async fn start(
        &self,
        project_id: &str,
        repo_path: &Path,
        port: u16,
    ) -> Result<StartedInstance> {
        if let Some(conflict) = PortConflict::check(port) {
            return Err(Error::SpawnFailed {
                project_id: project_id.to_string(),
                reason: conflict.to_string(),
            });
        }

        let mut child = self.spawn_editor(project_id, repo_path, port)?;
        let started_at = Utc::now();
        let Some(pid) = child.id() else {
            return Err(Error::SpawnFailed {
                project_id: project_id.to_string(),
                reason: "editor exited immediately".to_string(),
            });
        };

        let checker = TcpChecker::localhost(port, PROBE_TIMEOUT.min(self.settings.startup_timeout));
        let readiness = wait_until_ready(
            &checker,
            self.settings.startup_timeout,
            self.settings.readiness_interval,
            || match child.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => Some(e.to_string()),
            },
        )
        .await;

        match readiness {
            Readiness::Ready => {
                info!("Editor for '{}' is listening on port {} (PID {})", project_id, port, pid);
                self.children.lock().insert(pid, child);
                Ok(StartedInstance {
                    pid,
                    port,
                    url: self.instance_url(port, repo_path),
                    started_at,
                })
            }
            Readiness::Exited(status) => Err(Error::SpawnFailed {
                project_id: project_id.to_string(),
                reason: format!("editor exited before accepting connections ({})", status),
            }),
            Readiness::TimedOut => {
                warn!(
                    "Editor for '{}' did not bind port {} within {:?}, killing PID {}",
                    project_id, port, self.settings.startup_timeout, pid
                );
                self.kill_failed_start(pid, child).await;
                Err(Error::StartTimeout {
                    project_id: project_id.to_string(),
                    port,
                    timeout: self.settings.startup_timeout,
                })
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn stop(&self, pid: u32) -> Result<()> {
        let nix_pid = validate_pid(pid)?;
        let child = self.children.lock().remove(&pid);

        if !pid_exists(pid) {
            debug!("PID {} already gone", pid);
            return Ok(());
        }

        #[cfg(unix)]
        let group = Self::signal_target_group(nix_pid);
        #[cfg(not(unix))]
        let group = None;

        match Self::send(nix_pid, group, Signal::SIGTERM) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => return Ok(()),
            Err(e) => {
                warn!("Failed to send SIGTERM to PID {}: {}", pid, e);
            }
        }
        // A stopped process only acts on SIGTERM once continued
        let _ = Self::send(nix_pid, group, Signal::SIGCONT);

        let grace = self.settings.grace_period;
        let exited = match child {
            Some(mut child) => tokio::time::timeout(grace, child.wait()).await.is_ok(),
            None => {
                let polls = (grace.as_millis() / STOP_POLL_INTERVAL.as_millis()).max(1);
                let mut exited = false;
                for _ in 0..polls {
                    tokio::time::sleep(STOP_POLL_INTERVAL).await;
                    if !is_process_running(pid) {
                        exited = true;
                        break;
                    }
                }
                exited
            }
        };

        if !exited && is_process_running(pid) {
            warn!(
                "Process {} did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                pid, grace
            );
            let _ = Self::send(nix_pid, group, Signal::SIGKILL);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        info!("Stopped editor process {}", pid);
        Ok(())
    }

    fn is_running(&self, pid: u32) -> bool {
        let mut children = self.children.lock();
        if let Some(child) = children.get_mut(&pid) {
            if matches!(child.try_wait(), Ok(None)) {
                return true;
            }
            // Exited; reaped by try_wait
            children.remove(&pid);
            return false;
        }
        drop(children);
        is_process_running(pid)
    }

    fn is_same_process(&self, pid: u32, started_at: DateTime<Utc>) -> bool {
        !self.settings.verify_start_time || validate_pid_start_time(pid, started_at)
    }

    async fn find_running_instances(&self) -> Result<Vec<LiveProcess>> {
        scan_processes(&self.settings.signature).await
    }

    fn instance_url(&self, port: u16, repo_path: &Path) -> String {
        instance_url(&self.settings.public_host, port, repo_path)
    }
}
