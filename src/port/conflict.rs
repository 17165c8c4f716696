use std::fmt;
use std::process::Command;

/// A port that is already bound by some process.
#[derive(Debug, Clone)]
pub struct PortConflict {
    pub port: u16,
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: Option<String>,
}

impl PortConflict {
    /// Check if a port is in use and return conflict info
    pub fn check(port: u16) -> Option<Self> {
        if Self::is_port_available(port) {
            return None;
        }

        let processes = Self::find_processes_on_port(port);
        Some(PortConflict { port, processes })
    }

    /// Check if a port is available (can bind to it).
    ///
    /// On macOS, binding to 127.0.0.1 can succeed even when 0.0.0.0 is in use,
    /// so both addresses are tried.
    pub fn is_port_available(port: u16) -> bool {
        std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
            && std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
    }

    fn find_processes_on_port(port: u16) -> Vec<ProcessInfo> {
        #[cfg(target_os = "linux")]
        {
            let mut processes = Self::find_processes_ss(port);
            if processes.is_empty() {
                processes = Self::find_processes_lsof(port);
            }
            processes
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self::find_processes_lsof(port)
        }
    }

    #[cfg(target_os = "linux")]
    fn find_processes_ss(port: u16) -> Vec<ProcessInfo> {
        let output = match Command::new("ss")
            .args(["-tlnp", &format!("sport = :{}", port)])
            .output()
        {
            Ok(o) if o.status.success() => o,
            _ => return Vec::new(),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut processes: Vec<ProcessInfo> = Vec::new();

        // users:(("node",pid=1234,fd=20)) - ss can report several pids per line
        for line in stdout.lines().skip(1) {
            let Some(users) = line.split_whitespace().last() else {
                continue;
            };
            for part in users.split(',') {
                let Some(pid) = part.strip_prefix("pid=").and_then(|p| p.parse::<u32>().ok())
                else {
                    continue;
                };
                if processes.iter().any(|p| p.pid == pid) {
                    continue;
                }
                let name = std::fs::read_to_string(format!("/proc/{}/comm", pid))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                let command = std::fs::read_to_string(format!("/proc/{}/cmdline", pid))
                    .ok()
                    .map(|s| s.replace('\0', " ").trim().to_string());
                processes.push(ProcessInfo { pid, name, command });
            }
        }

        processes
    }

    fn find_processes_lsof(port: u16) -> Vec<ProcessInfo> {
        let output = match Command::new("lsof")
            .args(["-i", &format!(":{}", port), "-P", "-n", "-F", "pc"])
            .output()
        {
            Ok(o) if o.status.success() => o,
            _ => return Vec::new(),
        };

        parse_lsof_fields(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `lsof -F pc` output: each process block starts with a `p<pid>`
/// line followed by a `c<command>` line.
fn parse_lsof_fields(stdout: &str) -> Vec<ProcessInfo> {
    let mut processes: Vec<ProcessInfo> = Vec::new();
    let mut current_pid: Option<u32> = None;

    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current_pid = pid.parse::<u32>().ok();
            if let Some(pid) = current_pid {
                if !processes.iter().any(|p| p.pid == pid) {
                    processes.push(ProcessInfo {
                        pid,
                        name: "unknown".to_string(),
                        command: None,
                    });
                }
            }
        } else if let Some(command) = line.strip_prefix('c') {
            if let Some(info) = current_pid.and_then(|pid| processes.iter_mut().find(|p| p.pid == pid)) {
                info.name = command.to_string();
                info.command = Some(command.to_string());
            }
        }
    }

    processes
}

impl fmt::Display for PortConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} is in use", self.port)?;
        if !self.processes.is_empty() {
            let holders: Vec<String> = self
                .processes
                .iter()
                .map(|p| format!("'{}' (PID {})", p.name, p.pid))
                .collect();
            write!(f, " by {}", holders.join(", "))?;
        }
        Ok(())
    }
}
