use crate::output::UserOutput;
use devhost::Orchestrator;

pub async fn run_start(
    orchestrator: &Orchestrator,
    project: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let started = orchestrator.start_instance(project).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&started)?);
    } else {
        out.success(&format!(
            "{} is running on port {} (PID {})",
            project, started.port, started.pid
        ));
        out.status(&format!("  {}", started.url));
    }
    Ok(())
}
