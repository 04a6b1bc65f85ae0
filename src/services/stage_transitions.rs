//! Follow-up derivation: which stage runs next given a finished one.
//!
//! | Completed | Condition                     | Follow-up                    |
//! |-----------|-------------------------------|------------------------------|
//! | Plan      | result carries subtasks       | each subtask, verbatim       |
//! | Code      | success                       | Test                         |
//! | Test      | success / failure             | Audit / Repair (with result) |
//! | Repair    | success                       | Test                         |
//! | Audit     | critical findings             | Repair (with result)         |
//! | Audit     | success, no critical findings | Optimize                     |
//! | Optimize  | success                       | Test                         |

use crate::domain::models::{StageInput, Task, TaskInputs, TaskResult, TaskType};

/// Follow-up tasks for `task` given its final `result`.
///
/// Derived tasks are unsubmitted: they carry the parent link, the parent's
/// file list and `max_retries`, but no id.
pub fn next_tasks(task: &Task, result: &TaskResult, max_retries: u32) -> Vec<Task> {
    if task.task_type == TaskType::Plan {
        return result
            .output
            .subtasks()
            .map(<[Task]>::to_vec)
            .unwrap_or_default();
    }

    let follow_up = |task_type: TaskType, objective: &str, upstream: StageInput| {
        Task::new(task_type, objective)
            .with_parent(task)
            .with_inputs(TaskInputs {
                files: task.inputs.files.clone(),
                upstream,
            })
            .with_max_retries(max_retries)
    };
    let predecessor = || StageInput::Predecessor { task_id: task.id };

    let next = match task.task_type {
        TaskType::Code if result.success => {
            Some(follow_up(TaskType::Test, "test code changes", predecessor()))
        }
        TaskType::Test if result.success => {
            Some(follow_up(TaskType::Audit, "audit code changes", predecessor()))
        }
        TaskType::Test => Some(follow_up(
            TaskType::Repair,
            "repair failing tests",
            StageInput::TestFailure {
                result: Box::new(result.clone()),
            },
        )),
        TaskType::Repair if result.success => {
            Some(follow_up(TaskType::Test, "verify repair", predecessor()))
        }
        TaskType::Audit if result.output.has_critical_findings() => Some(follow_up(
            TaskType::Repair,
            "repair audit findings",
            StageInput::AuditFindings {
                result: Box::new(result.clone()),
            },
        )),
        TaskType::Audit if result.success => {
            Some(follow_up(TaskType::Optimize, "optimize code", predecessor()))
        }
        TaskType::Optimize if result.success => Some(follow_up(
            TaskType::Test,
            "verify optimization didn't break tests",
            predecessor(),
        )),
        _ => None,
    };

    next.into_iter().collect()
}
