//! Configuration parsing and types.
//!
//! - `types` - Root config structure (`Config`, `PortsConfig`, `EditorConfig`, `RepositoryConfig`)
//! - `duration` - Human-readable duration strings
//! - `parser` - YAML config discovery and parsing
//! - `validation` - Config validation

mod duration;
mod parser;
mod types;
mod validation;

pub use duration::*;
pub use parser::*;
pub use types::*;
