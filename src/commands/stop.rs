use crate::output::UserOutput;
use devhost::Orchestrator;

pub async fn run_stop(
    orchestrator: &Orchestrator,
    project: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.progress(&format!("  Stopping {}...", project));
    match orchestrator.stop_instance(project).await {
        Ok(Some(record)) => {
            out.finish_progress(" done");
            out.success(&format!("Port {} is free", record.port));
            Ok(())
        }
        Ok(None) => {
            out.finish_progress(" not running");
            Ok(())
        }
        Err(e) => {
            out.finish_progress(" failed");
            Err(e.into())
        }
    }
}
