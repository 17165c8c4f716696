//! Process-table scan for editor instances.
//!
//! The scan is independent of the port pool's bookkeeping: it reports what
//! the operating system is actually running, whether or not devhost started
//! it.

use super::resources::ResourceUsage;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable set on every editor devhost spawns. Its value is the
/// project id, which lets a scan recover the identity of a process that lost
/// its record.
pub const PROJECT_ENV_MARKER: &str = "DEVHOST_PROJECT";

/// Flags whose value is the following argument, so that value is not
/// mistaken for the positional workspace path.
const VALUE_FLAGS: &[&str] = &[
    "--bind-addr",
    "--port",
    "--host",
    "--auth",
    "--config",
    "--user-data-dir",
    "--extensions-dir",
    "--cert",
    "--cert-key",
    "--locale",
    "--log",
    "--socket",
];

/// One editor process found in the process table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProcess {
    pub pid: u32,
    pub port: u16,
    pub repo_path: Option<PathBuf>,
    pub project_id: Option<String>,
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub uptime_secs: Option<u64>,
    pub command: String,
}

/// Port and workspace path recovered from an editor's argv.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub port: Option<u16>,
    pub path: Option<PathBuf>,
}

/// Parse an editor command line (argv without the program name is fine too).
///
/// Recognises `--bind-addr host:port`, `--bind-addr=host:port`, `--port N`
/// and `--port=N`. When both appear, the last one wins. The path is the last
/// positional argument.
pub fn parse_invocation<S: AsRef<str>>(args: &[S]) -> Invocation {
    let mut invocation = Invocation::default();
    let mut iter = args.iter().map(|a| a.as_ref()).skip(1);

    while let Some(arg) = iter.next() {
        if let Some((flag, value)) = arg.split_once('=').filter(|(f, _)| f.starts_with("--")) {
            if let Some(port) = port_from_flag(flag, value) {
                invocation.port = Some(port);
            }
            continue;
        }

        if VALUE_FLAGS.contains(&arg) {
            if let Some(value) = iter.next() {
                if let Some(port) = port_from_flag(arg, value) {
                    invocation.port = Some(port);
                }
            }
            continue;
        }

        if !arg.starts_with('-') {
            invocation.path = Some(PathBuf::from(arg));
        }
    }

    invocation
}

fn port_from_flag(flag: &str, value: &str) -> Option<u16> {
    match flag {
        "--port" => value.parse().ok(),
        "--bind-addr" => value.rsplit_once(':')?.1.parse().ok(),
        _ => None,
    }
}

/// Enumerate editor processes whose command line contains `signature`.
///
/// Entries without a parseable port are discarded. When several processes
/// claim the same port (an editor and its helper children) the lowest pid is
/// kept. The result is sorted by port.
pub async fn scan_processes(signature: &str) -> Result<Vec<LiveProcess>> {
    let candidates = list_candidates(signature).await?;
    let own_pid = std::process::id();

    let mut by_port: BTreeMap<u16, Candidate> = BTreeMap::new();
    for candidate in candidates {
        if candidate.pid == own_pid {
            continue;
        }
        let Some(port) = parse_invocation(&candidate.args).port else {
            debug!(
                "Ignoring PID {}: no port in '{}'",
                candidate.pid,
                candidate.args.join(" ")
            );
            continue;
        };
        match by_port.get(&port) {
            Some(existing) if existing.pid < candidate.pid => {}
            _ => {
                by_port.insert(port, candidate);
            }
        }
    }

    let usages = futures::future::join_all(
        by_port
            .values()
            .map(|c| ResourceUsage::query(c.pid)),
    )
    .await;

    let processes = by_port
        .into_iter()
        .zip(usages)
        .map(|((port, candidate), usage)| {
            let path = candidate
                .cwd
                .or_else(|| parse_invocation(&candidate.args).path);
            LiveProcess {
                pid: candidate.pid,
                port,
                repo_path: path,
                project_id: candidate.project_id,
                cpu_percent: usage.cpu_percent,
                memory_bytes: usage.memory_rss_bytes,
                uptime_secs: usage.uptime_secs,
                command: candidate.args.join(" "),
            }
        })
        .collect();

    Ok(processes)
}

/// A process whose argv matched the signature, before port parsing.
#[derive(Debug)]
struct Candidate {
    pid: u32,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    project_id: Option<String>,
}

fn matches_signature(args: &[String], signature: &str) -> bool {
    !signature.is_empty() && args.iter().any(|a| a.contains(signature))
}

#[cfg(target_os = "linux")]
async fn list_candidates(signature: &str) -> Result<Vec<Candidate>> {
    let mut entries = match tokio::fs::read_dir("/proc").await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("/proc unavailable ({}), falling back to ps", e);
            return list_candidates_ps(signature).await;
        }
    };

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };

        // Processes can vanish mid-scan; any read failure just skips them
        let Ok(raw) = tokio::fs::read(format!("/proc/{}/cmdline", pid)).await else {
            continue;
        };
        let args = split_nul(&raw);
        if !matches_signature(&args, signature) {
            continue;
        }

        let cwd = tokio::fs::read_link(format!("/proc/{}/cwd", pid)).await.ok();
        let project_id = tokio::fs::read(format!("/proc/{}/environ", pid))
            .await
            .ok()
            .and_then(|raw| project_from_environ(&raw));

        candidates.push(Candidate {
            pid,
            args,
            cwd,
            project_id,
        });
    }

    Ok(candidates)
}

#[cfg(not(target_os = "linux"))]
async fn list_candidates(signature: &str) -> Result<Vec<Candidate>> {
    list_candidates_ps(signature).await
}

/// `ps` only exposes argv, so cwd and the project marker are unknown here.
async fn list_candidates_ps(signature: &str) -> Result<Vec<Candidate>> {
    let output = tokio::process::Command::new("ps")
        .args(["-axo", "pid=,args="])
        .output()
        .await?;

    if !output.status.success() {
        return Ok(Vec::new());
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout))
        .into_iter()
        .filter(|c| matches_signature(&c.args, signature))
        .collect())
}

fn parse_ps_output(stdout: &str) -> Vec<Candidate> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse::<u32>().ok()?;
            let args: Vec<String> = parts.map(str::to_string).collect();
            if args.is_empty() {
                return None;
            }
            Some(Candidate {
                pid,
                args,
                cwd: None,
                project_id: None,
            })
        })
        .collect()
}

fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn project_from_environ(raw: &[u8]) -> Option<String> {
    let prefix = format!("{}=", PROJECT_ENV_MARKER);
    split_nul(raw)
        .into_iter()
        .find_map(|var| var.strip_prefix(&prefix).map(str::to_string))
        .filter(|id| !id.is_empty())
}
