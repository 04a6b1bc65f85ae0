//! Workspace adapters.

pub mod git;

pub use git::GitWorkspace;
