//! Domain layer for the pipewright workflow engine
//!
//! Pure data and the port traits the orchestrator depends on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
