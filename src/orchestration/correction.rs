//! Self-correction loop for rejected shadow-runs.
//!
//! When a shadow-run is rejected, the correction loop decides between
//! re-queueing the task (optionally with a revised command from the
//! [`CommandPlanner`]) and abandoning it once the retry budget is spent.
//! Abandonment cascades to every transitive dependent before scheduling
//! continues.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Task, TaskDAG, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::{shlog, shlog_debug};

/// External planning collaborator that proposes command revisions.
///
/// `revise` receives the failing task and its captured output; returning
/// `None` retries the same command unchanged.
#[async_trait]
pub trait CommandPlanner: Send + Sync {
    /// Propose a replacement command for a rejected task.
    async fn revise(&self, task: &Task, captured_output: &str) -> Option<String>;
}

/// Default planner: always retry the same command.
#[derive(Debug, Default, Clone)]
pub struct RetrySamePlanner;

#[async_trait]
impl CommandPlanner for RetrySamePlanner {
    async fn revise(&self, _task: &Task, _captured_output: &str) -> Option<String> {
        None
    }
}

/// What the correction loop decided for a rejected task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// The task was re-queued for another attempt.
    Requeued {
        /// Attempt number just completed.
        attempt: u32,
        /// True if the planner revised the command.
        revised: bool,
    },
    /// The retry budget is spent; the task and its dependents were abandoned.
    Abandoned {
        /// Why the task was abandoned.
        reason: String,
        /// All tasks abandoned by the cascade, the rejected task first.
        cascade: Vec<TaskId>,
    },
}

/// Bounded retry driver for rejected shadow-runs.
pub struct CorrectionLoop {
    planner: Arc<dyn CommandPlanner>,
    max_retries: u32,
}

impl CorrectionLoop {
    /// Create a correction loop with the given retry budget.
    pub fn new(planner: Arc<dyn CommandPlanner>, max_retries: u32) -> Self {
        Self {
            planner,
            max_retries,
        }
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn task<'a>(&self, dag: &'a TaskDAG, task_id: &TaskId) -> Result<&'a Task> {
        dag.get_task(task_id)
            .ok_or_else(|| Error::Validation(format!("task {} not found", task_id)))
    }

    /// Handle a rejected shadow-run for a task currently `Running`.
    ///
    /// Marks the task `Failed`, then either re-queues it (`Failed → Ready`,
    /// command possibly revised) or abandons it with its transitive
    /// dependents. A task that always rejects is abandoned after exactly
    /// `max_retries + 1` attempts.
    pub async fn handle_rejection(
        &self,
        dag: &mut TaskDAG,
        task_id: &TaskId,
        reason: &str,
        captured_output: &str,
    ) -> Result<CorrectionOutcome> {
        dag.mark(
            task_id,
            TaskStatus::Failed {
                error: reason.to_string(),
            },
        )?;

        let (attempt, name) = {
            let task = self.task(dag, task_id)?;
            (task.attempts, task.name.clone())
        };

        if attempt <= self.max_retries {
            let revision = {
                let task = self.task(dag, task_id)?;
                self.planner.revise(task, captured_output).await
            };
            let revised = revision.is_some();
            if let Some(command) = revision {
                shlog_debug!(
                    "Planner revised command for {}: {:?}",
                    name,
                    command
                );
                if let Some(task) = dag.get_task_mut(task_id) {
                    task.set_command(&command);
                }
            }
            dag.mark(task_id, TaskStatus::Ready)?;
            shlog!(
                "Task {} rejected ({}), re-queued for attempt {}/{}",
                name,
                reason,
                attempt + 1,
                self.max_retries + 1
            );
            Ok(CorrectionOutcome::Requeued { attempt, revised })
        } else {
            let abandon_reason = format!(
                "retry budget exhausted after {} attempt(s): {}",
                attempt, reason
            );
            let cascade = dag.abandon_with_dependents(task_id, &abandon_reason)?;
            shlog!(
                "Task {} abandoned after {} attempt(s); cascade abandoned {} task(s)",
                name,
                attempt,
                cascade.len() - 1
            );
            Ok(CorrectionOutcome::Abandoned {
                reason: abandon_reason,
                cascade,
            })
        }
    }
}
