//! Port trait definitions (Hexagonal Architecture)
//!
//! - StageHandler: the work performed for one workflow stage
//! - Workspace: the repository the handlers operate on

pub mod stage_handler;
pub mod workspace;

pub use stage_handler::StageHandler;
pub use workspace::{CommandOutput, Workspace, WorkspaceError, WorkspaceResult};
