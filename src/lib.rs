//! Pipewright - policy-gated workflow orchestrator
//!
//! Pipewright drives a repository through plan, code, test, audit, repair,
//! optimize and release stages. Each stage runs as a task on a bounded
//! queue; results are gated by configurable policies, and follow-up tasks
//! are derived from each finished task's outcome.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): tasks, results, policies, and the port traits
//! - **Service Layer** (`services`): orchestrator, task store, policy and evaluation engines
//! - **Handlers** (`handlers`): one [`StageHandler`] per workflow stage
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, git workspace
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use pipewright::{Config, Orchestrator, Task, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::builder().config(Config::default()).build()?;
//!     orchestrator.start().await?;
//!     orchestrator.submit(Task::new(TaskType::Plan, "fix bug in login")).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod handlers;
pub mod infrastructure;
pub mod services;

pub use domain::models::{Config, StageOutput, Task, TaskId, TaskResult, TaskState, TaskType};
pub use domain::ports::{StageHandler, Workspace};
pub use domain::{DomainError, DomainResult};
pub use handlers::{default_registry, HandlerContext};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::workspace::GitWorkspace;
pub use services::{
    EvaluationEngine, HandlerRegistry, Orchestrator, OrchestratorBuilder, OrchestratorEvent,
    PolicyEngine,
};
