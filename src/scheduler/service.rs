//! Scheduler Service
//!
//! Owns the expression lifecycle on top of a [`TaskRepository`].
//!
//! ## Responsibilities
//! - **Compilation**: turning an expression's text into a persisted task graph, or
//!   failing the expression without writing a single task.
//! - **Dispatch**: handing ready tasks to workers (one claim per task).
//! - **Completion cascade**: after each recorded result, deciding whether the
//!   owning expression is settled and finalizing it exactly once.

use super::repository::{StoreError, TaskRepository};
use super::types::*;
use crate::compiler::{self, types::CompileError};

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid task id: {0}")]
    InvalidTaskId(i64),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

pub struct Scheduler {
    repo: Arc<dyn TaskRepository>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Arc<Self> {
        Arc::new(Self { repo })
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    /// Stores a new expression in `Awaiting`.
    pub async fn insert(&self, text: &str, owner: UserId) -> SchedulerResult<ExpressionId> {
        let id = self.repo.insert_expression(text, owner).await?;
        tracing::debug!("Inserted expression {} for user {}", id, owner);
        Ok(id)
    }

    /// Compiles `text` and persists its task graph under `id`.
    ///
    /// Only an `Awaiting` expression is compiled. A compile failure finalizes
    /// it as failed with the error's message before it is returned. No task
    /// row is written in that case.
    pub async fn build_graph(&self, id: ExpressionId, text: &str) -> SchedulerResult<TaskId> {
        let expression = self.get_expression(id).await?;
        if expression.status != ExpressionStatus::Awaiting {
            return Err(StoreError::ExpressionNotAwaiting {
                id,
                actual: expression.status,
            }
            .into());
        }

        let graph = match compiler::compile(text) {
            Ok(graph) => graph,
            Err(e) => {
                self.repo
                    .finalize_expression(id, &Outcome::Failed(e.to_string()))
                    .await?;
                tracing::info!("Expression {} failed to compile: {}", id, e);
                return Err(e.into());
            }
        };

        let sink = self.repo.store_graph(id, &graph).await?;
        tracing::info!(
            "Expression {} is calculating ({} tasks, sink {})",
            id,
            graph.len(),
            sink
        );
        Ok(sink)
    }

    /// `insert` followed by `build_graph`, the way the expression API calls them.
    /// On a compile failure the expression stays stored as failed.
    pub async fn submit_expression(
        &self,
        text: &str,
        owner: UserId,
    ) -> SchedulerResult<ExpressionId> {
        let id = self.insert(text, owner).await?;
        self.build_graph(id, text).await?;
        Ok(id)
    }

    pub async fn get_expression(&self, id: ExpressionId) -> SchedulerResult<Expression> {
        self.repo
            .get_expression(id)
            .await?
            .ok_or_else(|| StoreError::ExpressionNotFound(id).into())
    }

    pub async fn list_expressions(&self, owner: UserId) -> SchedulerResult<Vec<Expression>> {
        Ok(self.repo.list_expressions(owner).await?)
    }

    pub async fn set_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> SchedulerResult<()> {
        self.repo.set_expression_status(id, status).await?;
        Ok(())
    }

    /// Claims one ready task. `Ok(None)` means nothing is ready right now.
    pub async fn fetch_task(&self) -> SchedulerResult<Option<ReadyTask>> {
        let task = self.repo.claim_ready_task().await?;
        match &task {
            Some(task) => tracing::debug!(
                "Dispatching task {} ({} {} {}) of expression {}",
                task.id,
                task.arg1,
                task.operation,
                task.arg2,
                task.expression_id
            ),
            None => tracing::trace!("No ready task"),
        }
        Ok(task)
    }

    /// Records a worker's result and runs the completion cascade.
    ///
    /// An empty `error_message` means success.
    pub async fn submit_result(
        &self,
        task_id: i64,
        result: f64,
        error_message: &str,
    ) -> SchedulerResult<Task> {
        if task_id <= 0 {
            return Err(SchedulerError::InvalidTaskId(task_id));
        }
        let task_id = TaskId(task_id);
        let outcome = Outcome::from_submission(result, error_message);

        let task = match self.repo.record_result(task_id, &outcome).await {
            Ok(task) => task,
            Err(StoreError::InvalidTransition { task_id, actual, .. }) if actual.is_terminal() => {
                // A retried submission. Re-run the cascade in case the first
                // attempt recorded the result but never got to it.
                if let Some(task) = self.repo.get_task(task_id).await? {
                    self.complete_expression(task.expression_id).await?;
                }
                return Err(StoreError::InvalidTransition {
                    task_id,
                    expected: TaskStatus::InProcess,
                    actual,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        match &outcome {
            Outcome::Done(value) => tracing::info!("Task {} done: {}", task.id, value),
            Outcome::Failed(message) => tracing::info!("Task {} failed: {}", task.id, message),
        }

        self.complete_expression(task.expression_id).await?;
        Ok(task)
    }

    /// Read-only lookup of one task's value.
    pub async fn fetch_result(&self, task_id: i64) -> SchedulerResult<TaskResult> {
        if task_id <= 0 {
            return Err(SchedulerError::InvalidTaskId(task_id));
        }
        let task = self
            .repo
            .get_task(TaskId(task_id))
            .await?
            .ok_or(StoreError::TaskNotFound(TaskId(task_id)))?;

        Ok(TaskResult {
            ready: task.status == TaskStatus::Done,
            result: task.result,
        })
    }

    /// Finalizes the expression if it is settled.
    ///
    /// Returns the outcome only when this call performed the transition, so a
    /// second call on a terminal expression is a no-op returning `None`.
    pub async fn complete_expression(&self, id: ExpressionId) -> SchedulerResult<Option<Outcome>> {
        let expression = self.get_expression(id).await?;
        if expression.status.is_terminal() {
            return Ok(None);
        }
        let Some(sink) = expression.sink_task_id else {
            return Ok(None);
        };

        let tasks = self.repo.tasks_for_expression(id).await?;
        let Some(outcome) = resolve_outcome(&tasks, sink) else {
            return Ok(None);
        };

        if !self.repo.finalize_expression(id, &outcome).await? {
            return Ok(None);
        }

        match &outcome {
            Outcome::Done(value) => tracing::info!("Expression {} done: {}", id, value),
            Outcome::Failed(message) => tracing::info!("Expression {} failed: {}", id, message),
        }
        Ok(Some(outcome))
    }

    pub async fn task_status_counts(&self) -> SchedulerResult<TaskStatusCounts> {
        Ok(self.repo.task_status_counts().await?)
    }
}

/// Decides the outcome of an expression from its task rows, or `None` while
/// it can still make progress.
///
/// The expression is settled when no task is in process and every waiting
/// task depends, directly or not, on a failed one (it can never become
/// ready). A terminal sink decides the outcome; otherwise the lowest-id
/// failed task does. `tasks` must be ordered by id; dependencies always have
/// lower ids than their dependents.
pub fn resolve_outcome(tasks: &[Task], sink: TaskId) -> Option<Outcome> {
    let sink_task = tasks.iter().find(|task| task.id == sink)?;

    let mut blocked: HashSet<TaskId> = HashSet::new();
    for task in tasks {
        match task.status {
            TaskStatus::InProcess => return None,
            TaskStatus::Failed => {
                blocked.insert(task.id);
            }
            TaskStatus::Wait => {
                if task.dependencies().any(|dependency| blocked.contains(&dependency)) {
                    blocked.insert(task.id);
                } else {
                    return None;
                }
            }
            TaskStatus::Done => {}
        }
    }

    match sink_task.status {
        TaskStatus::Done => Some(Outcome::Done(sink_task.result)),
        TaskStatus::Failed => Some(Outcome::Failed(sink_task.error_message.clone())),
        _ => tasks
            .iter()
            .find(|task| task.status == TaskStatus::Failed)
            .map(|task| Outcome::Failed(task.error_message.clone())),
    }
}
