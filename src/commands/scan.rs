use crate::output::UserOutput;
use devhost::process::ResourceUsage;
use devhost::Orchestrator;

pub async fn run_scan(
    orchestrator: &Orchestrator,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let processes = orchestrator.scan().await?;

    if json {
        out.status(&serde_json::to_string_pretty(&processes)?);
        return Ok(());
    }

    if processes.is_empty() {
        out.status("No editor processes found");
        return Ok(());
    }

    out.status(&format!(
        "  {:>5}  {:<8} {:<16} {:>6} {:>10} {:>8}  PATH",
        "PORT", "PID", "PROJECT", "CPU%", "MEM", "UPTIME"
    ));
    for p in &processes {
        out.status(&format!(
            "  {:>5}  {:<8} {:<16} {:>6} {:>10} {:>8}  {}",
            p.port,
            p.pid,
            p.project_id.as_deref().unwrap_or("-"),
            p.cpu_percent
                .map(|c| format!("{:.1}", c))
                .unwrap_or_else(|| "-".to_string()),
            p.memory_bytes
                .map(ResourceUsage::format_memory)
                .unwrap_or_else(|| "-".to_string()),
            p.uptime_secs
                .map(format_uptime)
                .unwrap_or_else(|| "-".to_string()),
            p.repo_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ));
    }
    Ok(())
}

fn format_uptime(secs: u64) -> String {
    match secs {
        s if s >= 86_400 => format!("{}d{}h", s / 86_400, (s % 86_400) / 3600),
        s if s >= 3600 => format!("{}h{}m", s / 3600, (s % 3600) / 60),
        s if s >= 60 => format!("{}m{}s", s / 60, s % 60),
        s => format!("{}s", s),
    }
}
