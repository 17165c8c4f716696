use crate::output::UserOutput;
use devhost::{InstanceListing, ListOptions, Orchestrator};

pub async fn run_list(
    orchestrator: &Orchestrator,
    json: bool,
    changes: bool,
    reconcile: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let listing = orchestrator
        .list_instances(ListOptions {
            include_changes: changes,
            reconcile,
        })
        .await?;

    if json {
        out.status(&serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    print_listing(&listing, out);
    Ok(())
}

fn print_listing(listing: &InstanceListing, out: &dyn UserOutput) {
    out.status("Editor Instances:");
    out.status(&format!("{:-<72}", ""));

    if listing.instances.is_empty() {
        out.status("  No instances running");
    }

    for view in &listing.instances {
        let icon = if view.running { "+" } else { "x" };
        let branch = view
            .repository
            .as_ref()
            .and_then(|r| r.branch.as_deref())
            .map(|b| format!(" [{}]", b))
            .unwrap_or_default();
        out.status(&format!(
            "  {} {:<20} {:>5}  PID {:<8} {}{}",
            icon, view.project_id, view.port, view.pid, view.url, branch
        ));

        if !view.running {
            out.status("      not running (run `devhost reconcile` to release the port)");
        }
        if !view.slug_shared_with.is_empty() {
            out.warning(&format!(
                "      slug '{}' is shared with: {}",
                view.slug,
                view.slug_shared_with.join(", ")
            ));
        }
        if let Some(changes) = &view.changes {
            out.status(&format!(
                "      {} changed file(s), +{} -{}",
                changes.changes.len(),
                changes.additions,
                changes.deletions
            ));
        }
    }

    out.blank();
    out.status(&format!(
        "{} tracked, {} running, {} editor process(es) on this host",
        listing.tracked, listing.running, listing.live_total
    ));
    if listing.untracked > 0 {
        out.warning(&format!(
            "{} editor process(es) not started by devhost (see `devhost scan`)",
            listing.untracked
        ));
    }
}
