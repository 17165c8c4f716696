//! Port allocation with a lowest-port-first policy and durable bookkeeping.
//!
//! A start goes through two phases in the pool:
//!
//! 1. [`PortPool::allocate`] takes the lowest free port and holds it as a
//!    [`Reservation`] for the project.
//! 2. [`PortPool::commit`] turns the reservation into a [`PortRecord`] once the
//!    editor process is up, or [`PortPool::release`] hands the port back when
//!    the start failed.
//!
//! Every port in the configured range is always in exactly one state (see
//! [`PortPoolState::verify`]). Reservations are shared with other devhost
//! processes through the store, tagged with the PID that made them.

use super::store::{PersistedPool, PersistedRecord, PersistedReservation, PortStore};
use crate::config::PortsConfig;
use crate::error::{validate_pid_for_check, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A committed instance: a live editor process bound to a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub port: u16,
    pub pid: u32,
    pub project_id: String,
    pub repo_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// A port held for a project whose editor is still starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub port: u16,
    /// The devhost process running the start
    pub owner_pid: u32,
    pub repo_path: PathBuf,
    pub reserved_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_own(&self) -> bool {
        self.owner_pid == std::process::id()
    }
}

/// In-memory pool state.
#[derive(Debug, Clone)]
pub struct PortPoolState {
    records: BTreeMap<String, PortRecord>,
    pending: BTreeMap<String, Reservation>,
    free_ports: BTreeSet<u16>,
    low: u16,
    high: u16,
}

impl PortPoolState {
    pub fn empty(low: u16, high: u16) -> Self {
        Self {
            records: BTreeMap::new(),
            pending: BTreeMap::new(),
            free_ports: (low..=high).collect(),
            low,
            high,
        }
    }

    /// Rebuild state from disk.
    ///
    /// The free list is recomputed from the range rather than trusted, so a
    /// state file written for a different range (or edited by hand) still
    /// yields a consistent pool. When two records claim one port the earliest
    /// started one wins. Reservations survive only while their owner process
    /// is alive.
    pub fn from_persisted(persisted: PersistedPool, low: u16, high: u16) -> Self {
        let mut state = Self::empty(low, high);

        let mut entries: Vec<(String, PersistedRecord)> = persisted.records.into_iter().collect();
        entries.sort_by(|a, b| a.1.started_at.cmp(&b.1.started_at).then(a.0.cmp(&b.0)));

        let mut held = BTreeSet::new();
        for (project_id, record) in entries {
            if validate_pid_for_check(record.pid).is_none() {
                warn!(
                    "Dropping persisted record for '{}': invalid PID {}",
                    project_id, record.pid
                );
                continue;
            }
            if !held.insert(record.port) {
                warn!(
                    "Dropping persisted record for '{}': port {} is already held by another record",
                    project_id, record.port
                );
                continue;
            }
            state.free_ports.remove(&record.port);
            state.records.insert(
                project_id.clone(),
                PortRecord {
                    port: record.port,
                    pid: record.pid,
                    project_id,
                    repo_path: record.repo_path,
                    started_at: record.started_at,
                },
            );
        }

        for (project_id, reservation) in persisted.reservations {
            if state.records.contains_key(&project_id) {
                continue;
            }
            if !crate::process::is_process_running(reservation.owner_pid) {
                debug!(
                    "Dropping reservation of port {} for '{}': PID {} is gone",
                    reservation.port, project_id, reservation.owner_pid
                );
                continue;
            }
            if !state.free_ports.remove(&reservation.port) {
                warn!(
                    "Dropping reservation of port {} for '{}': port is not free",
                    reservation.port, project_id
                );
                continue;
            }
            state.pending.insert(
                project_id,
                Reservation {
                    port: reservation.port,
                    owner_pid: reservation.owner_pid,
                    repo_path: reservation.repo_path,
                    reserved_at: reservation.reserved_at,
                },
            );
        }

        let persisted_free: BTreeSet<u16> = persisted.free_ports.into_iter().collect();
        if persisted_free != state.free_ports {
            debug!(
                "Persisted free list differed from the recomputed one ({} vs {} ports)",
                persisted_free.len(),
                state.free_ports.len()
            );
        }

        state
    }

    /// The durable form. Reserved ports are written as free and listed again
    /// under their reservation.
    pub fn to_persisted(&self) -> PersistedPool {
        let records = self
            .records
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    PersistedRecord {
                        port: r.port,
                        pid: r.pid,
                        repo_path: r.repo_path.clone(),
                        started_at: r.started_at,
                    },
                )
            })
            .collect();

        let free_ports: BTreeSet<u16> = self
            .free_ports
            .iter()
            .copied()
            .chain(self.pending.values().map(|r| r.port))
            .collect();

        let reservations = self
            .pending
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    PersistedReservation {
                        port: r.port,
                        owner_pid: r.owner_pid,
                        repo_path: r.repo_path.clone(),
                        reserved_at: r.reserved_at,
                    },
                )
            })
            .collect();

        PersistedPool {
            records,
            free_ports: free_ports.into_iter().collect(),
            reservations,
        }
    }

    /// Replace this state with a fresher saved one.
    pub fn resync(&mut self, persisted: PersistedPool) {
        *self = Self::from_persisted(persisted, self.low, self.high);
    }

    pub fn range(&self) -> (u16, u16) {
        (self.low, self.high)
    }

    pub fn records(&self) -> impl Iterator<Item = &PortRecord> {
        self.records.values()
    }

    pub fn reservations(&self) -> impl Iterator<Item = (&String, &Reservation)> {
        self.pending.iter()
    }

    /// Free ports in ascending order.
    pub fn free_ports(&self) -> Vec<u16> {
        self.free_ports.iter().copied().collect()
    }

    /// Number of instances counted against the cap (committed + starting).
    pub fn in_use(&self) -> usize {
        self.records.len() + self.pending.len()
    }

    /// Check that every port in range is exactly one of free, reserved or recorded.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let mut held = BTreeSet::new();
        for port in self
            .records
            .values()
            .map(|r| r.port)
            .chain(self.pending.values().map(|r| r.port))
        {
            if !held.insert(port) {
                return Err(format!("port {} is held twice", port));
            }
            if self.free_ports.contains(&port) {
                return Err(format!("port {} is both held and free", port));
            }
        }

        for port in &self.free_ports {
            if !self.in_range(*port) {
                return Err(format!("free port {} is outside the range", port));
            }
        }

        for port in self.low..=self.high {
            if !self.free_ports.contains(&port) && !held.contains(&port) {
                return Err(format!("port {} was lost", port));
            }
        }

        Ok(())
    }

    fn in_range(&self, port: u16) -> bool {
        port >= self.low && port <= self.high
    }

    fn return_port(&mut self, port: u16) {
        if self.in_range(port) {
            self.free_ports.insert(port);
        }
    }
}

/// Process-wide port pool.
///
/// State is guarded by a synchronous mutex that is never held across an
/// `.await`. Every mutation reloads the store under its lock, is applied to a
/// copy, flushed, and only then made visible, so a failed flush leaves the
/// pool unchanged. Reservations live only in the pool that made them.
pub struct PortPool {
    state: parking_lot::Mutex<PortPoolState>,
    store: Arc<dyn PortStore>,
    max_instances: usize,
}

impl PortPool {
    /// Load pool state from `store`, or start empty if nothing was saved.
    pub fn open(ports: &PortsConfig, store: Arc<dyn PortStore>) -> Result<Self> {
        let _lock = store.lock()?;
        let state = match store.load()? {
            Some(persisted) => {
                let state = PortPoolState::from_persisted(persisted, ports.low, ports.high);
                for record in state.records().filter(|r| !state.in_range(r.port)) {
                    warn!(
                        "Record for '{}' holds port {} outside the configured range {}-{}; it will not be reused after release",
                        record.project_id, record.port, ports.low, ports.high
                    );
                }
                info!(
                    "Loaded port pool: {} record(s), {} free port(s)",
                    state.records.len(),
                    state.free_ports.len()
                );
                state
            }
            None => PortPoolState::empty(ports.low, ports.high),
        };

        // Normalised state goes back to disk straight away
        store.save(&state.to_persisted())?;

        Ok(Self {
            state: parking_lot::Mutex::new(state),
            store,
            max_instances: ports.max_instances,
        })
    }

    /// A pool whose state is never persisted.
    pub fn in_memory(ports: &PortsConfig) -> Self {
        Self {
            state: parking_lot::Mutex::new(PortPoolState::empty(ports.low, ports.high)),
            store: Arc::new(super::store::NoopPortStore),
            max_instances: ports.max_instances,
        }
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Reserve a port for `project_id`.
    ///
    /// Returns the existing port if the project already has a record or a
    /// reservation made by this process. Otherwise takes the lowest free
    /// port. Fails with [`Error::ResourceExhausted`] when the instance cap is
    /// reached or no port is free; never evicts another project. A project
    /// that another devhost process is still starting fails with
    /// [`Error::SpawnFailed`].
    pub fn allocate(&self, project_id: &str, repo_path: &Path) -> Result<u16> {
        let max_instances = self.max_instances;
        self.mutate(|state| {
            if let Some(record) = state.records.get(project_id) {
                return Ok(record.port);
            }
            if let Some(reservation) = state.pending.get(project_id) {
                if !reservation.is_own() {
                    return Err(Error::SpawnFailed {
                        project_id: project_id.to_string(),
                        reason: format!(
                            "already being started by devhost PID {}",
                            reservation.owner_pid
                        ),
                    });
                }
                return Ok(reservation.port);
            }

            if state.in_use() >= max_instances {
                return Err(Error::ResourceExhausted {
                    project_id: project_id.to_string(),
                    reason: format!("instance cap of {} reached", max_instances),
                });
            }

            let Some(port) = state.free_ports.pop_first() else {
                return Err(Error::ResourceExhausted {
                    project_id: project_id.to_string(),
                    reason: format!("no free port in {}-{}", state.low, state.high),
                });
            };

            state.pending.insert(
                project_id.to_string(),
                Reservation {
                    port,
                    owner_pid: std::process::id(),
                    repo_path: repo_path.to_path_buf(),
                    reserved_at: Utc::now(),
                },
            );
            debug!("Reserved port {} for '{}'", port, project_id);
            Ok(port)
        })
    }

    /// Record a successfully started instance.
    ///
    /// The project must hold a reservation for `record.port`. Committing the
    /// same port again for an existing record refreshes its pid.
    pub fn commit(&self, record: PortRecord) -> Result<()> {
        if validate_pid_for_check(record.pid).is_none() {
            return Err(Error::InvalidPid {
                pid: record.pid,
                reason: format!("cannot record instance for '{}'", record.project_id),
            });
        }

        self.mutate(|state| {
            let reserved_port = state
                .pending
                .get(&record.project_id)
                .filter(|r| r.is_own())
                .map(|r| r.port);
            let recorded_port = state.records.get(&record.project_id).map(|r| r.port);

            match (reserved_port, recorded_port) {
                (Some(port), _) if port == record.port => {
                    state.pending.remove(&record.project_id);
                }
                (None, Some(port)) if port == record.port => {}
                _ => {
                    return Err(Error::Persistence(format!(
                        "cannot commit '{}': port {} is not reserved for it",
                        record.project_id, record.port
                    )));
                }
            }

            info!(
                "Recorded '{}' on port {} (PID {})",
                record.project_id, record.port, record.pid
            );
            state.records.insert(record.project_id.clone(), record);
            Ok(())
        })
    }

    /// Drop the record or this process's reservation for `project_id` and
    /// return its port to the free list. Unknown projects are a no-op.
    pub fn release(&self, project_id: &str) -> Result<Option<u16>> {
        self.mutate(|state| {
            let port = if let Some(record) = state.records.remove(project_id) {
                Some(record.port)
            } else if state.pending.get(project_id).is_some_and(Reservation::is_own) {
                state.pending.remove(project_id).map(|r| r.port)
            } else {
                None
            };

            if let Some(port) = port {
                state.return_port(port);
                debug!("Released port {} from '{}'", port, project_id);
            }
            Ok(port)
        })
    }

    /// Release `project_id` only if its record still carries `pid`.
    ///
    /// Used by reconciliation so a record that was replaced by a fresh start
    /// after the liveness check is left alone.
    pub fn release_if_pid(&self, project_id: &str, pid: u32) -> Result<bool> {
        self.mutate(|state| {
            match state.records.get(project_id) {
                Some(record) if record.pid == pid => {
                    let port = record.port;
                    state.records.remove(project_id);
                    state.return_port(port);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    pub fn get(&self, project_id: &str) -> Option<PortRecord> {
        self.current().records.get(project_id).cloned()
    }

    pub fn reservation(&self, project_id: &str) -> Option<Reservation> {
        self.current().pending.get(project_id).cloned()
    }

    /// All committed records, ordered by port. May be stale until reconciled.
    pub fn all(&self) -> Vec<PortRecord> {
        let mut records: Vec<PortRecord> = self.current().records.values().cloned().collect();
        records.sort_by_key(|r| r.port);
        records
    }

    pub fn free_ports(&self) -> Vec<u16> {
        self.current().free_ports()
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> PortPoolState {
        self.current().clone()
    }

    /// State guard refreshed from the store.
    ///
    /// Saves are atomic renames, so reading without the store lock still sees
    /// a whole file. A failed read falls back to the cached state.
    fn current(&self) -> parking_lot::MutexGuard<'_, PortPoolState> {
        let mut guard = self.state.lock();
        match self.store.load() {
            Ok(Some(persisted)) => guard.resync(persisted),
            Ok(None) => {}
            Err(e) => warn!("Using cached port state: {}", e),
        }
        guard
    }

    /// Apply `f` to the freshest saved state and flush the result.
    ///
    /// The store lock is held from reload to save, so mutations from other
    /// processes sharing the store are never overwritten.
    fn mutate<T>(&self, f: impl FnOnce(&mut PortPoolState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock();
        let _lock = self.store.lock()?;
        if let Some(persisted) = self.store.load()? {
            guard.resync(persisted);
        }

        let mut next = guard.clone();
        let value = f(&mut next)?;

        let persisted = next.to_persisted();
        if persisted != guard.to_persisted() {
            self.store.save(&persisted)?;
        }

        *guard = next;
        Ok(value)
    }
}
