#![allow(unused_assignments)]

//! # devhost
//!
//! Per-repository, browser-accessible editor instances on a bounded local
//! port pool.
//!
//! ## Features
//!
//! - **Port Pool**: lowest-port-first allocation with an admission cap and
//!   restart-safe persistence
//! - **Process Supervision**: spawn, readiness probing, graceful stop with
//!   escalation, liveness checks with PID-reuse detection
//! - **Reconciliation**: persisted records checked against the live process
//!   table; stale records released, untracked editors reported
//! - **Status**: instance listings with repository metadata, URL slugs and
//!   optional git change summaries
//!
//! ## Quick Start
//!
//! ```no_run
//! use devhost::{ListOptions, Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), devhost::Error> {
//! let parser = Parser::new();
//! let config_path = parser.find_config_file()?;
//! let config = parser.load_config(&config_path)?;
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(config)
//!     .work_dir(config_path.parent().unwrap_or(std::path::Path::new(".")).to_path_buf())
//!     .build()?;
//!
//! let started = orchestrator.start_instance("alpha").await?;
//! println!("alpha is at {}", started.url);
//!
//! let listing = orchestrator.list_instances(ListOptions::default()).await?;
//! println!("{} tracked, {} live", listing.tracked, listing.live_total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - All orchestrator methods take `&self`; clones share state
//! - Port bookkeeping is guarded by a lock never held across `.await`
//! - Starts run to completion even if the caller goes away

pub mod config;
pub mod error;
pub mod git;
pub mod healthcheck;
pub mod orchestrator;
pub mod port;
pub mod process;
pub mod registry;

// Re-export commonly used types
pub use config::{Config, Parser};
pub use error::{Error, Result};
pub use orchestrator::{InstanceListing, ListOptions, Orchestrator, ReconcileReport};
pub use port::{PortPool, PortRecord};
pub use process::{LiveProcess, StartedInstance, Supervisor};
pub use registry::{RepositoryRef, RepositoryRegistry};
