//! Persistence contract of the scheduler.
//!
//! Every mutation of expression and task rows goes through [`TaskRepository`].
//! Implementations must make the two contended transitions conditional:
//! claiming (`wait -> in_process`) and finalizing an expression (only from a
//! non-terminal status). Everything else in the scheduler builds on those.

use super::types::*;
use crate::compiler::graph::TaskGraph;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("expression {0} not found")]
    ExpressionNotFound(ExpressionId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {task_id} is {actual:?}, expected {expected:?}")]
    InvalidTransition {
        task_id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("expression {id} is {actual:?}, expected Awaiting")]
    ExpressionNotAwaiting {
        id: ExpressionId,
        actual: ExpressionStatus,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("an error occurred while accessing the database: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Stores a new expression with status `Awaiting`.
    async fn insert_expression(&self, source: &str, owner: UserId) -> StoreResult<ExpressionId>;

    async fn get_expression(&self, id: ExpressionId) -> StoreResult<Option<Expression>>;

    /// All expressions of one owner, oldest first.
    async fn list_expressions(&self, owner: UserId) -> StoreResult<Vec<Expression>>;

    /// Unconditional status overwrite, used by the front end.
    async fn set_expression_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> StoreResult<()>;

    /// Persists every node of `graph` as a `Wait` task, records the sink and
    /// moves the expression to `Calculating`. Returns the sink task id.
    ///
    /// Only an `Awaiting` expression accepts a graph; any other status yields
    /// [`StoreError::ExpressionNotAwaiting`] and writes nothing.
    ///
    /// Once the sink row is visible to readers, every task it depends on is too.
    async fn store_graph(&self, id: ExpressionId, graph: &TaskGraph) -> StoreResult<TaskId>;

    /// Picks any ready task and claims it. `None` when nothing is ready.
    ///
    /// A task is ready when it waits and each task it references is `Done`.
    /// The claim is conditional on the row still being `Wait`, so concurrent
    /// callers never receive the same task.
    async fn claim_ready_task(&self) -> StoreResult<Option<ReadyTask>>;

    /// Moves an `InProcess` task to its terminal status and returns the row.
    async fn record_result(&self, id: TaskId, outcome: &Outcome) -> StoreResult<Task>;

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>>;

    /// All tasks of one expression, ordered by id.
    async fn tasks_for_expression(&self, id: ExpressionId) -> StoreResult<Vec<Task>>;

    /// Applies a terminal outcome iff the expression is not terminal yet.
    /// Returns whether this call performed the transition.
    async fn finalize_expression(&self, id: ExpressionId, outcome: &Outcome) -> StoreResult<bool>;

    /// Number of tasks per status across all expressions.
    async fn task_status_counts(&self) -> StoreResult<TaskStatusCounts>;
}
