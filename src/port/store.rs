use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_FILE_NAME: &str = "ports.json";
const LOCK_FILE_NAME: &str = ".lock";

/// On-disk form of the pool.
///
/// Ports reserved for an in-flight start are listed in `reservations` with
/// the PID of the devhost process that made them, and are also written as
/// free. The file therefore always satisfies `freePorts ∪ records.port ==
/// range`, and a crash mid-start leaves nothing behind once the owner PID is
/// gone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPool {
    #[serde(default)]
    pub records: BTreeMap<String, PersistedRecord>,
    #[serde(default)]
    pub free_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reservations: BTreeMap<String, PersistedReservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub port: u16,
    pub pid: u32,
    pub repo_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedReservation {
    pub port: u16,
    pub owner_pid: u32,
    pub repo_path: PathBuf,
    pub reserved_at: DateTime<Utc>,
}

/// Durable storage for pool state.
///
/// # Implementations
///
/// - [`JsonPortStore`] - `ports.json` written via atomic rename
/// - [`MemoryPortStore`] - keeps the last saved value in memory (tests)
/// - [`NoopPortStore`] - discards everything; every start begins empty
pub trait PortStore: Send + Sync {
    /// Load the last saved state, or `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<PersistedPool>>;

    /// Replace the saved state. Readers never observe a partial write.
    fn save(&self, state: &PersistedPool) -> Result<()>;

    /// Exclusive access to the saved state across a load-modify-save cycle.
    ///
    /// Blocks while another holder exists. The lock is released when the
    /// returned guard is dropped. Stores that are private to one pool need
    /// no locking.
    fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock::none())
    }
}

/// Guard returned by [`PortStore::lock`].
#[derive(Debug)]
pub struct StoreLock {
    file: Option<fs::File>,
}

impl StoreLock {
    pub fn none() -> Self {
        Self { file: None }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = FileExt::unlock(file);
        }
    }
}

/// Port store backed by `<state_dir>/ports.json`.
///
/// Several devhost processes may share one state directory. Each pool
/// mutation takes an advisory lock on `<state_dir>/.lock`, reloads the file,
/// applies its change and writes it back before unlocking, so no process
/// overwrites another's records.
pub struct JsonPortStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonPortStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(|e| {
            Error::Persistence(format!(
                "Failed to create state directory {}: {}",
                state_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            path: state_dir.join(STATE_FILE_NAME),
            lock_path: state_dir.join(LOCK_FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic file write using write-then-rename pattern
    fn atomic_write(path: &Path, contents: &str) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| Error::Persistence(format!("Failed to create temp file: {}", e)))?;

        file.write_all(contents.as_bytes())
            .map_err(|e| Error::Persistence(format!("Failed to write temp file: {}", e)))?;

        // Data must hit the disk before the rename makes it visible
        file.sync_all()
            .map_err(|e| Error::Persistence(format!("Failed to sync temp file: {}", e)))?;
        drop(file);

        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("Failed to rename temp file: {}", e)))?;

        Ok(())
    }
}

impl PortStore for JsonPortStore {
    fn load(&self) -> Result<Option<PersistedPool>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::Persistence(format!("Failed to parse {}: {}", self.path.display(), e)))
    }

    fn save(&self, state: &PersistedPool) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)?;
        Self::atomic_write(&self.path, &contents)
    }

    fn lock(&self) -> Result<StoreLock> {
        // A fresh handle per call: flock is per open file, so two pools in
        // one process exclude each other as well
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| Error::Persistence(format!("Failed to open lock file: {}", e)))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            debug!("Waiting for lock on {:?}", self.lock_path);
            FileExt::lock_exclusive(&file).map_err(|e| {
                Error::Persistence(format!(
                    "Failed to lock {}: {}",
                    self.lock_path.display(),
                    e
                ))
            })?;
        }

        // Holder PID, for diagnostics only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        Ok(StoreLock { file: Some(file) })
    }
}

/// Port store that keeps the last saved state in memory.
#[derive(Default)]
pub struct MemoryPortStore {
    saved: parking_lot::Mutex<Option<PersistedPool>>,
}

impl MemoryPortStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing saved state, as if loaded after a restart.
    pub fn with_state(state: PersistedPool) -> Self {
        Self {
            saved: parking_lot::Mutex::new(Some(state)),
        }
    }

    pub fn saved(&self) -> Option<PersistedPool> {
        self.saved.lock().clone()
    }
}

impl PortStore for MemoryPortStore {
    fn load(&self) -> Result<Option<PersistedPool>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, state: &PersistedPool) -> Result<()> {
        *self.saved.lock() = Some(state.clone());
        Ok(())
    }
}

/// No-op port store. Nothing survives a restart.
pub struct NoopPortStore;

impl PortStore for NoopPortStore {
    fn load(&self) -> Result<Option<PersistedPool>> {
        Ok(None)
    }

    fn save(&self, _state: &PersistedPool) -> Result<()> {
        Ok(())
    }
}
