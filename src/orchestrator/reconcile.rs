//! Drift detection between pool records and the live process table.
//!
//! [`plan`] is a pure function of the records, a liveness probe and a
//! process-table snapshot. The orchestrator applies the plan; nothing here
//! touches the pool.

use crate::port::PortRecord;
use crate::process::LiveProcess;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Result of probing a record's pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The pid is alive but belongs to a different process than the one
    /// that was recorded
    PidReused,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        self == Liveness::Alive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    ProcessExited,
    PidReused,
}

/// A record whose process is gone. Only ever reported, never raised as an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleRecord {
    pub project_id: String,
    pub port: u16,
    pub pid: u32,
    pub repo_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub reason: StaleReason,
}

/// What reconciliation should do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Records to release
    pub stale: Vec<StaleRecord>,
    /// Live editors with no record and no pending reservation on their port
    pub untracked: Vec<LiveProcess>,
}

/// Drift report returned to callers after a plan was applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Stale records that were released by this run
    pub released: Vec<StaleRecord>,
    /// Live editors devhost did not start, left alone
    pub untracked: Vec<LiveProcess>,
    /// Records remaining after the run
    pub tracked: usize,
    /// Editor processes found in the process table
    pub live_total: usize,
}

impl ReconcileReport {
    pub fn has_drift(&self) -> bool {
        !self.released.is_empty() || !self.untracked.is_empty()
    }
}

pub fn plan<F>(
    records: &[PortRecord],
    liveness: F,
    live: &[LiveProcess],
    reserved_ports: &BTreeSet<u16>,
) -> ReconcilePlan
where
    F: Fn(&PortRecord) -> Liveness,
{
    let mut stale = Vec::new();
    let mut held_ports = BTreeSet::new();

    for record in records {
        let reason = match liveness(record) {
            Liveness::Alive => {
                held_ports.insert(record.port);
                continue;
            }
            Liveness::Dead => StaleReason::ProcessExited,
            Liveness::PidReused => StaleReason::PidReused,
        };
        stale.push(StaleRecord {
            project_id: record.project_id.clone(),
            port: record.port,
            pid: record.pid,
            repo_path: record.repo_path.clone(),
            started_at: record.started_at,
            reason,
        });
    }

    ReconcilePlan {
        stale,
        untracked: untracked_processes(live, &held_ports, reserved_ports),
    }
}

/// Live entries whose port is neither held by a record nor reserved.
pub fn untracked_processes(
    live: &[LiveProcess],
    held_ports: &BTreeSet<u16>,
    reserved_ports: &BTreeSet<u16>,
) -> Vec<LiveProcess> {
    live.iter()
        .filter(|p| !held_ports.contains(&p.port) && !reserved_ports.contains(&p.port))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, port: u16, pid: u32) -> PortRecord {
        PortRecord {
            port,
            pid,
            project_id: project.to_string(),
            repo_path: PathBuf::from(format!("/srv/{}", project)),
            started_at: Utc::now(),
        }
    }

    fn live(pid: u32, port: u16) -> LiveProcess {
        LiveProcess {
            pid,
            port,
            repo_path: None,
            project_id: None,
            cpu_percent: None,
            memory_bytes: None,
            uptime_secs: None,
            command: format!("code-server --port {}", port),
        }
    }

    #[test]
    fn test_dead_records_are_stale() {
        let records = vec![record("alpha", 8080, 100), record("beta", 8081, 101)];
        let plan = plan(
            &records,
            |r| if r.pid == 100 { Liveness::Dead } else { Liveness::Alive },
            &[live(101, 8081)],
            &BTreeSet::new(),
        );

        assert_eq!(plan.stale.len(), 1);
        assert_eq!(plan.stale[0].project_id, "alpha");
        assert_eq!(plan.stale[0].reason, StaleReason::ProcessExited);
        assert!(plan.untracked.is_empty());
    }

    #[test]
    fn test_reused_pid_is_stale() {
        let records = vec![record("alpha", 8080, 100)];
        let plan = plan(&records, |_| Liveness::PidReused, &[], &BTreeSet::new());
        assert_eq!(plan.stale[0].reason, StaleReason::PidReused);
    }

    #[test]
    fn test_manual_process_is_untracked_not_adopted() {
        let records = vec![record("alpha", 8080, 100)];
        let plan = plan(
            &records,
            |_| Liveness::Alive,
            &[live(100, 8080), live(555, 8085)],
            &BTreeSet::new(),
        );
        assert!(plan.stale.is_empty());
        assert_eq!(plan.untracked.len(), 1);
        assert_eq!(plan.untracked[0].port, 8085);
    }

    #[test]
    fn test_reserved_port_is_not_untracked() {
        let reserved: BTreeSet<u16> = [8081].into_iter().collect();
        let plan = plan(&[], |_| Liveness::Alive, &[live(300, 8081)], &reserved);
        assert!(plan.untracked.is_empty());
    }

    #[test]
    fn test_process_on_stale_port_becomes_untracked() {
        // The recorded editor died and something else now serves its port
        let records = vec![record("alpha", 8080, 100)];
        let plan = plan(&records, |_| Liveness::Dead, &[live(900, 8080)], &BTreeSet::new());
        assert_eq!(plan.stale.len(), 1);
        assert_eq!(plan.untracked.len(), 1);
    }
}
