//! Application services: the orchestrator and the engines it consults.

pub mod evaluation_engine;
pub mod handler_registry;
pub mod orchestrator;
pub mod policy_engine;
pub mod stage_transitions;
pub mod task_store;
pub mod tool_runner;

pub use evaluation_engine::{EvaluationEngine, FailureCategory, FailureClassification, FailurePattern};
pub use handler_registry::HandlerRegistry;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorEvent, OrchestratorSettings, OrchestratorStatus,
};
pub use policy_engine::{Gate, GateOutcome, PolicyEngine};
pub use stage_transitions::next_tasks;
pub use task_store::{StoreStats, TaskStore};
pub use tool_runner::ToolRunner;
