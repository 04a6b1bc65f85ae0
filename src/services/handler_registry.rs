//! Maps each task type to the stage handler that executes it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskType;
use crate::domain::ports::StageHandler;

/// Registry of stage handlers keyed by task type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, returning the one it replaces.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn StageHandler>,
    ) -> Option<Arc<dyn StageHandler>> {
        self.handlers.insert(task_type, handler)
    }

    /// Builder form of `register`.
    pub fn with_handler(mut self, task_type: TaskType, handler: Arc<dyn StageHandler>) -> Self {
        self.register(task_type, handler);
        self
    }

    /// Handler for `task_type`.
    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    /// Whether `task_type` has a handler.
    pub fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Stages without a handler, in workflow order.
    pub fn missing_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| !self.contains(*t))
            .collect()
    }

    /// Fail unless every stage has a handler.
    pub fn validate_complete(&self) -> DomainResult<()> {
        let missing = self.missing_types();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::MissingHandlers(missing))
        }
    }

    /// Number of registered stage types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<(TaskType, &'static str)> =
            self.handlers.iter().map(|(t, h)| (*t, h.name())).collect();
        names.sort_by_key(|(t, _)| *t);
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}
