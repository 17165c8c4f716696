use crate::output::UserOutput;
use devhost::Orchestrator;

pub async fn run_reconcile(
    orchestrator: &Orchestrator,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let report = orchestrator.reconcile().await?;

    if json {
        out.status(&serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.has_drift() {
        out.success(&format!(
            "No drift: {} tracked instance(s) match the process table",
            report.tracked
        ));
        return Ok(());
    }

    for stale in &report.released {
        out.status(&format!(
            "  released {:<20} port {:>5}  PID {} ({:?})",
            stale.project_id, stale.port, stale.pid, stale.reason
        ));
    }
    for process in &report.untracked {
        let path = process
            .repo_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "?".to_string());
        out.warning(&format!(
            "  untracked port {:>5}  PID {:<8} {}",
            process.port, process.pid, path
        ));
    }

    out.blank();
    out.status(&format!(
        "{} stale record(s) released, {} untracked editor(s) left running",
        report.released.len(),
        report.untracked.len()
    ));
    Ok(())
}
