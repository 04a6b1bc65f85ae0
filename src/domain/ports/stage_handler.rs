//! Stage handler port - the work performed for one workflow stage.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{AgentContract, Task, TaskResult};

/// Capability object registered for a task type.
///
/// Handlers report every failure through the returned [`TaskResult`];
/// they never return an error to the orchestrator. Cancellation is
/// cooperative: long-running handlers should check `cancel` between steps.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Agent name used in decisions and logs.
    fn name(&self) -> &'static str;

    /// Static contract declared by the handler.
    fn contract(&self) -> &AgentContract;

    /// Run one attempt of `task`.
    async fn execute(&self, cancel: &CancellationToken, task: &Task) -> TaskResult;

    /// Whether the contract permits touching `path`.
    fn validate_path(&self, path: &str) -> bool {
        self.contract().validate_path(path)
    }
}
