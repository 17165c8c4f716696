//! Resource usage sampling for editor processes.
//!
//! - **Linux**: reads `/proc/{pid}/stat`, `/proc/{pid}/status` and `/proc/uptime`
//! - **macOS**: uses `ps`
//! - **Other platforms**: all metrics are `None`
//!
//! CPU percentage is the lifetime average since the process started, not an
//! instantaneous rate.

use serde::{Deserialize, Serialize};

/// Resource usage of one process. Every field is optional because the
/// process may exit or be unreadable between listing and sampling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// Resident set size in bytes
    pub memory_rss_bytes: Option<u64>,

    /// CPU usage percentage (per core, so can exceed 100)
    pub cpu_percent: Option<f64>,

    /// Seconds since the process started
    pub uptime_secs: Option<u64>,
}

impl ResourceUsage {
    /// Query resource usage for a process by PID.
    ///
    /// Returns default (all None) if the process doesn't exist or the query fails.
    pub async fn query(pid: u32) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::query_linux(pid).await
        }

        #[cfg(target_os = "macos")]
        {
            Self::query_macos(pid).await
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = pid;
            Self::default()
        }
    }

    /// Field indices below are 0-based after the `(comm)` field, so index 0
    /// is field 3 (state) in `man 5 proc`.
    #[cfg(target_os = "linux")]
    async fn query_linux(pid: u32) -> Self {
        let Ok(stat) = tokio::fs::read_to_string(format!("/proc/{}/stat", pid)).await else {
            return Self::default();
        };

        let fields = parse_proc_stat(&stat);
        if fields.is_empty() {
            return Self::default();
        }

        let utime = fields.get(11).and_then(|s| s.parse::<u64>().ok());
        let stime = fields.get(12).and_then(|s| s.parse::<u64>().ok());
        let starttime = fields.get(19).and_then(|s| s.parse::<u64>().ok());
        let rss_pages = fields.get(21).and_then(|s| s.parse::<u64>().ok());

        let uptime = tokio::fs::read_to_string("/proc/uptime")
            .await
            .ok()
            .and_then(|s| s.split_whitespace().next()?.parse::<f64>().ok());

        let hertz = clock_ticks_per_sec() as f64;
        let elapsed_secs = match (uptime, starttime) {
            (Some(up), Some(start)) => Some(up - start as f64 / hertz),
            _ => None,
        };

        let cpu_percent = match (utime, stime, elapsed_secs) {
            (Some(u), Some(s), Some(elapsed)) if elapsed > 0.0 => {
                Some(100.0 * ((u + s) as f64 / hertz) / elapsed)
            }
            _ => None,
        };

        // VmRSS is in kB and more accurate than stat's page count
        let rss_from_status = tokio::fs::read_to_string(format!("/proc/{}/status", pid))
            .await
            .ok()
            .and_then(|s| parse_vmrss_from_status(&s));

        Self {
            memory_rss_bytes: rss_from_status.or(rss_pages.map(|p| p * 4096)),
            cpu_percent,
            uptime_secs: elapsed_secs.filter(|e| *e >= 0.0).map(|e| e as u64),
        }
    }

    /// ps columns: rss (kB), %cpu, etime in seconds
    #[cfg(target_os = "macos")]
    async fn query_macos(pid: u32) -> Self {
        let output = tokio::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "rss=,%cpu=,etime="])
            .output()
            .await;

        let Ok(output) = output else {
            return Self::default();
        };
        if !output.status.success() {
            return Self::default();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parts: Vec<&str> = stdout.split_whitespace().collect();
        if parts.len() < 3 {
            return Self::default();
        }

        Self {
            memory_rss_bytes: parts[0].parse::<u64>().ok().map(|kb| kb * 1024),
            cpu_percent: parts[1].parse::<f64>().ok(),
            uptime_secs: parse_etime(parts[2]),
        }
    }

    /// Format memory bytes as human-readable string (e.g., "512.0 MB").
    pub fn format_memory(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.1} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.1} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.1} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_sec() -> u64 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .unwrap_or(100)
}

/// Split `/proc/{pid}/stat` after the `(comm)` field, which may itself
/// contain spaces and parentheses.
#[cfg(target_os = "linux")]
fn parse_proc_stat(content: &str) -> Vec<String> {
    let Some(comm_end) = content.rfind(')') else {
        return Vec::new();
    };
    content[comm_end + 1..]
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Format: `VmRSS:    12345 kB`
#[cfg(target_os = "linux")]
fn parse_vmrss_from_status(content: &str) -> Option<u64> {
    let line = content.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1024)
}

/// Parse ps `etime`: `[[dd-]hh:]mm:ss`
#[cfg(any(target_os = "macos", test))]
fn parse_etime(etime: &str) -> Option<u64> {
    let (days, rest) = match etime.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, etime),
    };
    let mut secs = 0u64;
    for part in rest.split(':') {
        secs = secs * 60 + part.parse::<u64>().ok()?;
    }
    Some(days * 86_400 + secs)
}
