//! Core configuration types.
//!
//! This module contains the root [`Config`] struct for `devhost.yaml`.

use super::parse_duration_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory (relative to the config file) holding `ports.json`.
pub const DEFAULT_STATE_DIR: &str = ".devhost";

/// Root configuration structure for devhost.yaml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub ports: PortsConfig,

    #[serde(default)]
    pub editor: EditorConfig,

    /// Where pool state is persisted. Relative paths are resolved against
    /// the directory containing the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl Config {
    /// Resolve the state directory for a config loaded from `base_dir`.
    pub fn state_dir_in(&self, base_dir: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.join(DEFAULT_STATE_DIR),
        }
    }
}

/// The reserved port range and the admission-control cap.
///
/// Both are fixed for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    /// Lowest port in the reserved range (inclusive)
    #[serde(default = "default_low_port")]
    pub low: u16,

    /// Highest port in the reserved range (inclusive)
    #[serde(default = "default_high_port")]
    pub high: u16,

    /// Maximum number of concurrent instances, independent of range size
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
}

impl PortsConfig {
    pub fn new(low: u16, high: u16, max_instances: usize) -> Self {
        Self {
            low,
            high,
            max_instances,
        }
    }

    /// Number of ports in the reserved range.
    pub fn range_len(&self) -> usize {
        if self.high < self.low {
            0
        } else {
            (self.high - self.low) as usize + 1
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self::new(default_low_port(), default_high_port(), default_max_instances())
    }
}

fn default_low_port() -> u16 {
    8080
}

fn default_high_port() -> u16 {
    8091
}

fn default_max_instances() -> usize {
    12
}

/// How editor-server processes are launched and recognised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Executable to launch
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments; `{port}`, `{path}` and `{project}` are substituted at launch
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Substring identifying our editor processes in the process table.
    /// Defaults to the file name of `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Host name used when building instance URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// How long to wait for the editor to accept connections (e.g. "10s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<String>,

    /// Delay between readiness probes (e.g. "250ms")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_interval: Option<String>,

    /// Time between SIGTERM and SIGKILL when stopping (e.g. "5s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,

    /// Compare the kernel start time of a recorded pid with the time the
    /// record was written, treating large mismatches as pid reuse
    #[serde(default = "default_true")]
    pub verify_start_time: bool,
}

impl EditorConfig {
    /// Returns 10 seconds if the format is invalid or not specified.
    pub fn get_startup_timeout(&self) -> Duration {
        self.startup_timeout
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(Duration::from_secs(10))
    }

    /// Returns 250 milliseconds if the format is invalid or not specified.
    pub fn get_readiness_interval(&self) -> Duration {
        self.readiness_interval
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(Duration::from_millis(250))
    }

    /// Returns 5 seconds if the format is invalid or not specified.
    pub fn get_grace_period(&self) -> Duration {
        self.grace_period
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(Duration::from_secs(5))
    }

    /// The process-table signature, falling back to the command's file name.
    pub fn get_signature(&self) -> String {
        if let Some(sig) = self.signature.as_ref().filter(|s| !s.trim().is_empty()) {
            return sig.clone();
        }
        Path::new(&self.command)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.command.clone())
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            signature: None,
            public_host: default_public_host(),
            startup_timeout: None,
            readiness_interval: None,
            grace_period: None,
            verify_start_time: true,
        }
    }
}

fn default_command() -> String {
    "code-server".to_string()
}

fn default_args() -> Vec<String> {
    [
        "--bind-addr",
        "127.0.0.1:{port}",
        "--auth",
        "none",
        "--disable-telemetry",
        "{path}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_true() -> bool {
    true
}

/// A repository entry in the registry section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: PathBuf,

    #[serde(rename = "type", default = "default_repository_kind")]
    pub kind: String,

    /// Display name; defaults to the map key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_repository_kind() -> String {
    "git".to_string()
}
