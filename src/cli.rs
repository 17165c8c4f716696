use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devhost")]
#[command(about = "devhost - Browser editors for your repositories on a bounded local port pool")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to devhost.yaml in this or a parent directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List tracked editor instances
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Include uncommitted git changes for each instance
        #[arg(long)]
        changes: bool,

        /// Release records of crashed editors before listing
        #[arg(long)]
        reconcile: bool,
    },
    /// Start an editor for a repository (no-op if already running)
    Start {
        /// Project id as listed under repositories: in devhost.yaml
        project: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop a repository's editor and free its port
    Stop {
        /// Project id
        project: String,
    },
    /// Release crashed instances and report editors devhost did not start
    Reconcile {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show uncommitted changes in a repository
    Changes {
        /// Project id
        project: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show editor processes found in the process table
    Scan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration without starting anything
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_flags() {
        let cli = Cli::try_parse_from(["devhost", "list", "--json", "--changes"]).unwrap();
        match cli.command {
            Commands::List {
                json,
                changes,
                reconcile,
            } => {
                assert!(json);
                assert!(changes);
                assert!(!reconcile);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["devhost", "stop", "alpha", "--config", "x.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }
}
