//! Editor process lifecycle: spawning, liveness probes, process-table scans
//! and resource sampling.

pub mod resources;
pub mod scan;
pub mod supervisor;

pub use resources::ResourceUsage;
pub use scan::{parse_invocation, scan_processes, LiveProcess, PROJECT_ENV_MARKER};
pub use supervisor::{ProcessSupervisor, StartedInstance, Supervisor, SupervisorSettings};

use crate::error::validate_pid_for_check;

/// Check whether a process with `pid` exists, using signal 0.
pub fn pid_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;

        let Some(nix_pid) = validate_pid_for_check(pid) else {
            return false;
        };

        match kill(nix_pid, None) {
            Ok(_) => true,
            Err(nix::errno::Errno::ESRCH) => false,
            // Permission denied means it exists
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = validate_pid_for_check(pid);
        true
    }
}

/// Check whether `pid` exists and has not exited.
///
/// A zombie holds its pid until reaped but no longer serves anything, so it
/// counts as dead. A stopped process still holds its sockets and counts as
/// running.
pub fn is_process_running(pid: u32) -> bool {
    if !pid_exists(pid) {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            if let Some(state) = parse_proc_state(&status) {
                return !is_exited_state(state);
            }
        }
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        let output = std::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "stat="])
            .output();
        if let Ok(output) = output {
            if output.status.success() {
                let stat = String::from_utf8_lossy(&output.stdout);
                let stat = stat.trim();
                return !stat.chars().next().is_some_and(is_exited_state);
            }
        }
    }

    true
}

/// Zombie or dead. Stopped (`T`) and tracing-stop (`t`) are not exits.
fn is_exited_state(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

/// Single-letter state code from `/proc/<pid>/status`.
///
/// Format: `State:\tZ (zombie)`
#[cfg(target_os = "linux")]
fn parse_proc_state(status: &str) -> Option<char> {
    let line = status.lines().find(|l| l.starts_with("State:"))?;
    line["State:".len()..].chars().find(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_running() {
        assert!(pid_exists(std::process::id()));
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_do_not_exist() {
        assert!(!pid_exists(0));
        assert!(!pid_exists(u32::MAX));
        assert!(!is_process_running(0));
    }

    #[test]
    fn test_only_exited_states_are_dead() {
        assert!(is_exited_state('Z'));
        assert!(is_exited_state('X'));
        assert!(!is_exited_state('T'));
        assert!(!is_exited_state('t'));
        assert!(!is_exited_state('S'));
        assert!(!is_exited_state('R'));
    }

    #[test]
    #[cfg(unix)]
    fn test_stopped_process_is_running() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        kill(pid, Signal::SIGSTOP).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        assert!(is_process_running(child.id()));

        kill(pid, Signal::SIGKILL).unwrap();
        child.wait().unwrap();
        assert!(!is_process_running(child.id()));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_parse_proc_state() {
        assert_eq!(parse_proc_state("Name:\tcat\nState:\tZ (zombie)\n"), Some('Z'));
        assert_eq!(parse_proc_state("State:\tS (sleeping)"), Some('S'));
        assert_eq!(parse_proc_state("Name:\tcat\n"), None);
    }
}
