mod builder;
mod core;
pub mod reconcile;
pub mod status;

pub use builder::OrchestratorBuilder;
pub use self::core::*;
pub use reconcile::{Liveness, ReconcileReport, StaleReason, StaleRecord};
pub use status::{slugify, InstanceListing, InstanceView};
