//! In-memory task repository.
//!
//! Rows live in `DashMap`s keyed by id. Conditional transitions are checked and
//! applied while holding the entry's shard lock, which gives the same
//! at-most-once claim guarantee as the conditional `UPDATE` of the SQLite store.
//! Nothing survives a restart; use it for tests and throwaway deployments.

use super::repository::{StoreError, StoreResult, TaskRepository};
use super::types::*;
use crate::compiler::graph::{PlannedOperand, TaskGraph};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct MemoryRepository {
    expressions: DashMap<ExpressionId, Expression>,
    tasks: DashMap<TaskId, Task>,
    next_expression_id: AtomicI64,
    next_task_id: AtomicI64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            expressions: DashMap::new(),
            tasks: DashMap::new(),
            next_expression_id: AtomicI64::new(1),
            next_task_id: AtomicI64::new(1),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Clones every task row so readiness can be evaluated without holding
    /// shard locks on the live map.
    fn snapshot(&self) -> HashMap<TaskId, Task> {
        self.tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn is_ready(task: &Task, rows: &HashMap<TaskId, Task>) -> bool {
    task.status == TaskStatus::Wait
        && task.dependencies().all(|dependency| {
            rows.get(&dependency)
                .map(|row| row.status == TaskStatus::Done)
                .unwrap_or(false)
        })
}

fn resolve(operand: Operand, rows: &HashMap<TaskId, Task>) -> f64 {
    match operand {
        Operand::Literal(value) => value,
        Operand::Task(id) => rows.get(&id).map(|row| row.result).unwrap_or_default(),
    }
}

#[async_trait]
impl TaskRepository for MemoryRepository {
    async fn insert_expression(&self, source: &str, owner: UserId) -> StoreResult<ExpressionId> {
        let id = ExpressionId(self.next_expression_id.fetch_add(1, Ordering::SeqCst));
        self.expressions.insert(
            id,
            Expression {
                id,
                owner,
                source: source.to_string(),
                status: ExpressionStatus::Awaiting,
                result: 0.0,
                error_message: String::new(),
                sink_task_id: None,
            },
        );
        Ok(id)
    }

    async fn get_expression(&self, id: ExpressionId) -> StoreResult<Option<Expression>> {
        Ok(self.expressions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_expressions(&self, owner: UserId) -> StoreResult<Vec<Expression>> {
        let mut expressions: Vec<Expression> = self
            .expressions
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        expressions.sort_by_key(|expression| expression.id);
        Ok(expressions)
    }

    async fn set_expression_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> StoreResult<()> {
        let mut entry = self
            .expressions
            .get_mut(&id)
            .ok_or(StoreError::ExpressionNotFound(id))?;
        entry.status = status;
        Ok(())
    }

    async fn store_graph(&self, id: ExpressionId, graph: &TaskGraph) -> StoreResult<TaskId> {
        // Status check and transition under one entry lock, so two builds of
        // the same expression cannot both pass. The cascade ignores the
        // expression until its sink row exists, and the sink is inserted last.
        let (first, sink) = {
            let mut expression = self
                .expressions
                .get_mut(&id)
                .ok_or(StoreError::ExpressionNotFound(id))?;
            if expression.status != ExpressionStatus::Awaiting {
                return Err(StoreError::ExpressionNotAwaiting {
                    id,
                    actual: expression.status,
                });
            }

            let first = self
                .next_task_id
                .fetch_add(graph.len() as i64, Ordering::SeqCst);
            let sink = TaskId(first + graph.sink as i64);
            expression.status = ExpressionStatus::Calculating;
            expression.sink_task_id = Some(sink);
            (first, sink)
        };

        let task_id = |index: usize| TaskId(first + index as i64);
        let to_operand = |operand: PlannedOperand| match operand {
            PlannedOperand::Literal(value) => Operand::Literal(value),
            PlannedOperand::Node(index) => Operand::Task(task_id(index)),
        };

        for (index, node) in graph.nodes.iter().enumerate() {
            let id_for_node = task_id(index);
            self.tasks.insert(
                id_for_node,
                Task {
                    id: id_for_node,
                    expression_id: id,
                    left: to_operand(node.left),
                    right: to_operand(node.right),
                    operation: node.operation,
                    status: TaskStatus::Wait,
                    result: 0.0,
                    error_message: String::new(),
                },
            );
        }

        tracing::debug!("Stored {} tasks for expression {}", graph.len(), id);
        Ok(sink)
    }

    async fn claim_ready_task(&self) -> StoreResult<Option<ReadyTask>> {
        let rows = self.snapshot();

        let mut candidates: Vec<&Task> = rows.values().filter(|task| is_ready(task, &rows)).collect();
        candidates.sort_by_key(|task| task.id);

        for candidate in candidates {
            // Another caller may have raced us since the snapshot.
            let claimed = match self.tasks.get_mut(&candidate.id) {
                Some(mut entry) => {
                    if entry.status == TaskStatus::Wait {
                        entry.status = TaskStatus::InProcess;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if !claimed {
                tracing::trace!("Task {} already claimed", candidate.id);
                continue;
            }

            let (_, prev_task_id1) = candidate.left.to_columns();
            let (_, prev_task_id2) = candidate.right.to_columns();
            return Ok(Some(ReadyTask {
                id: candidate.id,
                expression_id: candidate.expression_id,
                arg1: resolve(candidate.left, &rows),
                arg2: resolve(candidate.right, &rows),
                prev_task_id1,
                prev_task_id2,
                operation: candidate.operation,
                status: TaskStatus::InProcess,
                result: candidate.result,
            }));
        }

        Ok(None)
    }

    async fn record_result(&self, id: TaskId, outcome: &Outcome) -> StoreResult<Task> {
        let mut entry = self.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;

        if entry.status != TaskStatus::InProcess {
            return Err(StoreError::InvalidTransition {
                task_id: id,
                expected: TaskStatus::InProcess,
                actual: entry.status,
            });
        }

        let (result, error_message) = outcome.columns();
        entry.status = outcome.task_status();
        entry.result = result;
        entry.error_message = error_message.to_string();

        Ok(entry.value().clone())
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.tasks.get(&id).map(|entry| entry.value().clone()))
    }

    async fn tasks_for_expression(&self, id: ExpressionId) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.expression_id == id)
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn finalize_expression(&self, id: ExpressionId, outcome: &Outcome) -> StoreResult<bool> {
        let mut entry = self
            .expressions
            .get_mut(&id)
            .ok_or(StoreError::ExpressionNotFound(id))?;

        if entry.status.is_terminal() {
            return Ok(false);
        }

        let (result, error_message) = outcome.columns();
        entry.status = outcome.expression_status();
        entry.result = result;
        entry.error_message = error_message.to_string();
        Ok(true)
    }

    async fn task_status_counts(&self) -> StoreResult<TaskStatusCounts> {
        let mut counts = TaskStatusCounts::default();
        for entry in self.tasks.iter() {
            counts.add(entry.status, 1);
        }
        Ok(counts)
    }
}
