//! Operator execution with a simulated per-operator cost.

use crate::compiler::types::Operator;
use crate::scheduler::protocol::TaskMessage;

use std::time::Duration;
use thiserror::Error;

/// Simulated processing time of each operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDelays {
    pub addition: Duration,
    pub subtraction: Duration,
    pub multiplication: Duration,
    pub division: Duration,
}

impl OperationDelays {
    pub fn uniform(delay: Duration) -> Self {
        Self {
            addition: delay,
            subtraction: delay,
            multiplication: delay,
            division: delay,
        }
    }

    pub fn zero() -> Self {
        Self::uniform(Duration::ZERO)
    }

    pub fn for_operator(&self, operator: Operator) -> Duration {
        match operator {
            Operator::Add => self.addition,
            Operator::Subtract => self.subtraction,
            Operator::Multiply => self.multiplication,
            Operator::Divide => self.division,
        }
    }
}

impl Default for OperationDelays {
    fn default() -> Self {
        Self::uniform(Duration::from_millis(100))
    }
}

/// A task the worker refuses to execute. It is dropped without a submission.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComputeError {
    #[error("invalid task id: {0}")]
    InvalidTask(i64),

    #[error("task {0} has an empty operation")]
    EmptyOperation(i64),

    #[error("task {task_id} has unknown operation {operation:?}")]
    UnknownOperation { task_id: i64, operation: String },
}

/// What a worker reports back for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    pub task_id: i64,
    pub result: f64,
    /// Empty on success.
    pub error_message: String,
}

/// Validates a fetched task and returns its operator.
pub fn parse_task(task: &TaskMessage) -> Result<Operator, ComputeError> {
    if task.id <= 0 {
        return Err(ComputeError::InvalidTask(task.id));
    }
    if task.operation.trim().is_empty() {
        return Err(ComputeError::EmptyOperation(task.id));
    }
    task.operation
        .trim()
        .parse()
        .map_err(|_| ComputeError::UnknownOperation {
            task_id: task.id,
            operation: task.operation.clone(),
        })
}

/// Sleeps for the operator's cost, then computes `arg1 <op> arg2`.
///
/// Arithmetic errors (division by zero, overflow) are results, not errors:
/// the computation carries `result = 0` and the error's message.
pub async fn execute(
    task: &TaskMessage,
    delays: &OperationDelays,
) -> Result<Computation, ComputeError> {
    let operator = parse_task(task)?;

    let delay = delays.for_operator(operator);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let computation = match operator.apply(task.arg1, task.arg2) {
        Ok(result) => Computation {
            task_id: task.id,
            result,
            error_message: String::new(),
        },
        Err(e) => Computation {
            task_id: task.id,
            result: 0.0,
            error_message: e.to_string(),
        },
    };
    Ok(computation)
}
