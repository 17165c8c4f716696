//! Readiness probes used while an editor is starting.

mod checker;
mod tcp;

pub use checker::{wait_until_ready, HealthChecker, Readiness};
pub use tcp::TcpChecker;
