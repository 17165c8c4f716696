use crate::output::UserOutput;
use devhost::Parser as ConfigParser;
use std::path::PathBuf;

pub fn run_validate(config_path: Option<PathBuf>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let parser = ConfigParser::new();
    let path = match config_path {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&path)?;

    out.success(&format!("{} is valid", path.display()));
    out.status(&format!(
        "  ports {}-{}, up to {} instance(s)",
        config.ports.low, config.ports.high, config.ports.max_instances
    ));
    out.status(&format!(
        "  editor '{}' (signature '{}')",
        config.editor.command,
        config.editor.get_signature()
    ));
    for (id, repo) in &config.repositories {
        if !repo.path.exists() {
            out.warning(&format!(
                "  repository '{}' points to missing path {}",
                id,
                repo.path.display()
            ));
        }
    }
    out.status(&format!("  repositories: {}", config.repositories.len()));
    Ok(())
}
