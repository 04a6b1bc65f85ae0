//! Infrastructure layer module
//!
//! Adapters and process-level plumbing:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Git workspace (tokio::process)
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod workspace;
