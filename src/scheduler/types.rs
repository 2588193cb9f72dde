use crate::compiler::types::{ArithmeticError, Operator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an expression row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ExpressionId(pub i64);

/// Identifier of a task row. Valid ids are strictly positive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(pub i64);

/// Identifier of the user owning an expression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an expression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionStatus {
    /// Stored, graph not built yet.
    Awaiting,
    /// Task graph persisted; workers are resolving it.
    Calculating,
    Done,
    Failed,
}

impl ExpressionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionStatus::Awaiting => "awaiting",
            ExpressionStatus::Calculating => "calculating",
            ExpressionStatus::Done => "done",
            ExpressionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpressionStatus::Done | ExpressionStatus::Failed)
    }
}

impl FromStr for ExpressionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting" => Ok(ExpressionStatus::Awaiting),
            "calculating" => Ok(ExpressionStatus::Calculating),
            "done" => Ok(ExpressionStatus::Done),
            "failed" => Ok(ExpressionStatus::Failed),
            other => Err(format!("unknown expression status: {}", other)),
        }
    }
}

/// Lifecycle of a task: `Wait -> InProcess -> Done | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created at graph-build time, not claimed yet.
    Wait,
    /// Claimed by exactly one worker.
    InProcess,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Wait => "wait",
            TaskStatus::InProcess => "in_process",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait" => Ok(TaskStatus::Wait),
            "in_process" => Ok(TaskStatus::InProcess),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A task operand: a literal value or the result of another task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Literal(f64),
    Task(TaskId),
}

impl Operand {
    pub fn dependency(&self) -> Option<TaskId> {
        match self {
            Operand::Literal(_) => None,
            Operand::Task(id) => Some(*id),
        }
    }

    /// Splits into the stored `(arg, prev_task_id)` column pair.
    pub fn to_columns(&self) -> (f64, Option<TaskId>) {
        match self {
            Operand::Literal(value) => (*value, None),
            Operand::Task(id) => (0.0, Some(*id)),
        }
    }

    pub fn from_columns(arg: f64, prev_task_id: Option<TaskId>) -> Self {
        match prev_task_id {
            Some(id) => Operand::Task(id),
            None => Operand::Literal(arg),
        }
    }
}

/// A submitted arithmetic expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expression {
    pub id: ExpressionId,
    pub owner: UserId,
    pub source: String,
    pub status: ExpressionStatus,
    pub result: f64,
    pub error_message: String,
    /// The task whose outcome becomes the expression's outcome.
    /// Set together with the transition to `Calculating`.
    pub sink_task_id: Option<TaskId>,
}

/// One binary operation of an expression's graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub expression_id: ExpressionId,
    pub left: Operand,
    pub right: Operand,
    pub operation: Operator,
    pub status: TaskStatus,
    pub result: f64,
    pub error_message: String,
}

impl Task {
    pub fn dependencies(&self) -> impl Iterator<Item = TaskId> {
        self.left
            .dependency()
            .into_iter()
            .chain(self.right.dependency())
    }
}

/// A claimed task with both operands already resolved to numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyTask {
    pub id: TaskId,
    pub expression_id: ExpressionId,
    pub arg1: f64,
    pub arg2: f64,
    pub prev_task_id1: Option<TaskId>,
    pub prev_task_id2: Option<TaskId>,
    pub operation: Operator,
    pub status: TaskStatus,
    pub result: f64,
}

/// The terminal outcome of a task or an expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    Done(f64),
    Failed(String),
}

impl Outcome {
    /// An empty error message means success, anything else is a failure.
    /// A non-finite result cannot be stored or sent on, so it fails the task.
    pub fn from_submission(result: f64, error_message: &str) -> Self {
        if !error_message.is_empty() {
            Outcome::Failed(error_message.to_string())
        } else if !result.is_finite() {
            Outcome::Failed(ArithmeticError::OutOfRange.to_string())
        } else {
            Outcome::Done(result)
        }
    }

    pub fn task_status(&self) -> TaskStatus {
        match self {
            Outcome::Done(_) => TaskStatus::Done,
            Outcome::Failed(_) => TaskStatus::Failed,
        }
    }

    pub fn expression_status(&self) -> ExpressionStatus {
        match self {
            Outcome::Done(_) => ExpressionStatus::Done,
            Outcome::Failed(_) => ExpressionStatus::Failed,
        }
    }

    /// The `(result, error_message)` column pair.
    pub fn columns(&self) -> (f64, &str) {
        match self {
            Outcome::Done(value) => (*value, ""),
            Outcome::Failed(message) => (0.0, message.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatusCounts {
    pub wait: usize,
    pub in_process: usize,
    pub done: usize,
    pub failed: usize,
}

impl TaskStatusCounts {
    pub fn add(&mut self, status: TaskStatus, count: usize) {
        match status {
            TaskStatus::Wait => self.wait += count,
            TaskStatus::InProcess => self.in_process += count,
            TaskStatus::Done => self.done += count,
            TaskStatus::Failed => self.failed += count,
        }
    }
}

/// Answer to a read-only result lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub ready: bool,
    pub result: f64,
}
