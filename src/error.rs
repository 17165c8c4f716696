// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(devhost::config::validation),
        help("Check the ports, editor and repositories sections of devhost.yaml")
    )]
    Validation(String),

    #[error("No capacity for '{project_id}': {reason}")]
    #[diagnostic(
        code(devhost::port::exhausted),
        help("Stop an instance with `devhost stop <project>` or raise ports.max_instances")
    )]
    ResourceExhausted { project_id: String, reason: String },

    #[error("Failed to launch editor for '{project_id}': {reason}")]
    #[diagnostic(
        code(devhost::process::spawn_failed),
        help("Check that the editor command exists and that the port is not held by another process")
    )]
    SpawnFailed { project_id: String, reason: String },

    #[error("Editor for '{project_id}' did not listen on port {port} within {timeout:?}")]
    #[diagnostic(
        code(devhost::process::start_timeout),
        help("The editor may be slow to start. Increase editor.startup_timeout in devhost.yaml")
    )]
    StartTimeout {
        project_id: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Not found: {0}")]
    #[diagnostic(
        code(devhost::not_found),
        help("List known instances with `devhost list`")
    )]
    NotFound(String),

    #[error("Persistence error: {0}")]
    #[diagnostic(code(devhost::state::persistence))]
    Persistence(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ResourceExhausted { .. } => Some(
                "All instance slots are in use. Stop one with `devhost stop <project>`, or run `devhost reconcile` to release crashed instances.".to_string(),
            ),
            Error::SpawnFailed { reason, .. } if reason.contains("in use") => Some(
                "Another process holds the port. Run `devhost scan` to see editor processes started outside devhost.".to_string(),
            ),
            Error::SpawnFailed { .. } => {
                Some("Check that editor.command is installed and executable".to_string())
            }
            Error::StartTimeout { .. } => Some(
                "Increase editor.startup_timeout, or run the editor command by hand to see why it does not bind".to_string(),
            ),
            Error::NotFound(id) => Some(format!(
                "Check that '{}' is listed under repositories: in devhost.yaml",
                id
            )),
            Error::Config(msg) if msg.contains("Could not find") => Some(
                "Create a devhost.yaml or pass one with --config".to_string(),
            ),
            Error::Validation(_) => Some("Fix devhost.yaml and retry".to_string()),
            Error::Persistence(_) => Some(
                "The state file may be corrupt. Stop running editors, then remove the state directory to reset port bookkeeping.".to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: "PID 0 refers to the process group, not a process".to_string(),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: "refusing to signal PID 1 (init)".to_string(),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: "exceeds i32::MAX, cannot convert safely".to_string(),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 for existence checks.
/// Use validate_pid for signal operations; use this for read-only checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

/// Allowed gap between a record's `startedAt` and the kernel's start time
/// for the same pid before the pid is considered recycled.
const START_TIME_TOLERANCE_SECS: i64 = 60;

/// Query the kernel clock tick rate (jiffies per second) at runtime.
///
/// Falls back to 100 (the common default) if sysconf fails.
#[cfg(target_os = "linux")]
fn clock_ticks_per_sec() -> u64 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .unwrap_or(100)
}

/// Kernel start time of a process, if it can be determined.
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> Option<chrono::DateTime<chrono::Utc>> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parens, so parse after the last ')'
    let close_paren = stat.rfind(')')?;
    let fields: Vec<&str> = stat.get(close_paren + 2..)?.split_whitespace().collect();
    // starttime is field 22 of stat, index 19 after pid and comm
    let start_jiffies = fields.get(19)?.parse::<u64>().ok()?;

    let uptime = std::fs::read_to_string("/proc/uptime").ok()?;
    let uptime_secs = uptime.split_whitespace().next()?.parse::<f64>().ok()?;

    let age_secs = uptime_secs - (start_jiffies as f64 / clock_ticks_per_sec() as f64);
    let age = chrono::Duration::milliseconds((age_secs.max(0.0) * 1000.0) as i64);
    Some(chrono::Utc::now() - age)
}

#[cfg(target_os = "macos")]
pub fn process_start_time(pid: u32) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;

    let output = std::process::Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let lstart = String::from_utf8_lossy(&output.stdout);
    // lstart format: "Mon Jan  1 12:00:00 2024", in local time
    let naive =
        chrono::NaiveDateTime::parse_from_str(lstart.trim(), "%a %b %e %H:%M:%S %Y").ok()?;
    chrono::Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn process_start_time(_pid: u32) -> Option<chrono::DateTime<chrono::Utc>> {
    None
}

/// Check if a PID belongs to the expected process by comparing start times.
///
/// Returns true if the PID appears valid (start time matches or cannot be determined),
/// false if the PID was clearly reused by a different process.
pub fn validate_pid_start_time(pid: u32, expected_start: chrono::DateTime<chrono::Utc>) -> bool {
    let Some(actual_start) = process_start_time(pid) else {
        // Can't verify, trust the PID
        return true;
    };

    let diff = (actual_start - expected_start).num_seconds().abs();
    if diff > START_TIME_TOLERANCE_SECS {
        tracing::warn!(
            "PID {} appears to be reused: process started at {} vs recorded {}",
            pid,
            actual_start,
            expected_start
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn validate_pid_rejects_reserved_values() {
        assert!(validate_pid(0).is_err());
        assert!(validate_pid(1).is_err());
        assert!(validate_pid(i32::MAX as u32 + 1).is_err());
        assert!(validate_pid(4242).is_ok());
    }

    #[test]
    fn validate_pid_for_check_allows_init() {
        assert!(validate_pid_for_check(1).is_some());
        assert!(validate_pid_for_check(0).is_none());
        assert!(validate_pid_for_check(u32::MAX).is_none());
    }

    #[test]
    fn nonexistent_pid_is_trusted() {
        // Can't read a start time for a pid that doesn't exist
        assert!(validate_pid_start_time(u32::MAX - 1, Utc::now()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_pid_with_ancient_start_is_rejected() {
        let old = chrono::DateTime::parse_from_rfc3339("2001-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!validate_pid_start_time(std::process::id(), old));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_pid_start_time_is_recent() {
        let started = process_start_time(std::process::id()).expect("own start time");
        let age = Utc::now() - started;
        assert!(age.num_seconds() >= -1);
        assert!(validate_pid_start_time(std::process::id(), started));
    }

    #[test]
    fn exhausted_has_suggestion() {
        let err = Error::ResourceExhausted {
            project_id: "alpha".into(),
            reason: "cap of 2 instances reached".into(),
        };
        assert!(err.with_suggestion().contains("Hint:"));
    }
}
