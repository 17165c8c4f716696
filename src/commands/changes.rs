use crate::output::UserOutput;
use devhost::git::ChangeKind;
use devhost::Orchestrator;

pub async fn run_changes(
    orchestrator: &Orchestrator,
    project: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let summary = orchestrator.changes(project).await?;

    if json {
        out.status(&serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    out.status(&format!(
        "{} on {}",
        project,
        summary.branch.as_deref().unwrap_or("(no branch)")
    ));
    if summary.changes.is_empty() {
        out.status("  working tree clean");
        return Ok(());
    }

    for change in &summary.changes {
        let marker = match change.kind {
            ChangeKind::Added => "A",
            ChangeKind::Deleted => "D",
            ChangeKind::Renamed => "R",
            ChangeKind::Modified => "M",
        };
        let path = match &change.old_path {
            Some(old) => format!("{} -> {}", old, change.path),
            None => change.path.clone(),
        };
        out.status(&format!(
            "  {} {:<50} +{} -{}",
            marker, path, change.additions, change.deletions
        ));
    }
    out.status(&format!(
        "  {} file(s), +{} -{}",
        summary.changes.len(),
        summary.additions,
        summary.deletions
    ));
    Ok(())
}
