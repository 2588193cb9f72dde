//! Network Protocol Definitions
//!
//! DTOs exchanged over HTTP between the orchestrator, its workers and API
//! clients. Worker-facing messages use flat primitive fields (ids as integers,
//! `0` for an absent predecessor, the operator as a one-character string) so
//! any client can speak the protocol without the crate's types.

use super::types::*;
use serde::{Deserialize, Deserializer, Serialize};

pub const ENDPOINT_TASK_FETCH: &str = "/internal/task/fetch";
pub const ENDPOINT_TASK_RESULT: &str = "/internal/task/result";
pub const ENDPOINT_TASK_RESULT_GET: &str = "/internal/task/:id/result";

pub const ENDPOINT_CALCULATE: &str = "/api/v1/calculate";
pub const ENDPOINT_EXPRESSIONS: &str = "/api/v1/expressions";
pub const ENDPOINT_EXPRESSION_GET: &str = "/api/v1/expressions/:id";
pub const ENDPOINT_HEALTH: &str = "/health";

pub const NO_TASKS_AVAILABLE: &str = "no tasks available";

pub fn task_result_path(task_id: i64) -> String {
    format!("/internal/task/{}/result", task_id)
}

fn null_as_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// A claimed task with resolved operands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    pub id: i64,
    pub expression_id: i64,
    pub arg1: f64,
    pub arg2: f64,
    pub prev_task_id1: i64,
    pub prev_task_id2: i64,
    pub operation: String,
    pub status: String,
    pub result: f64,
}

impl From<ReadyTask> for TaskMessage {
    fn from(task: ReadyTask) -> Self {
        Self {
            id: task.id.0,
            expression_id: task.expression_id.0,
            arg1: task.arg1,
            arg2: task.arg2,
            prev_task_id1: task.prev_task_id1.map(|id| id.0).unwrap_or(0),
            prev_task_id2: task.prev_task_id2.map(|id| id.0).unwrap_or(0),
            operation: task.operation.to_string(),
            status: task.status.as_str().to_string(),
            result: task.result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResultRequest {
    pub task_id: i64,
    /// JSON has no infinities; a non-finite value arrives as `null`.
    #[serde(deserialize_with = "null_as_nan")]
    pub result: f64,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResultResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchResultResponse {
    pub success: bool,
    pub result: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateRequest {
    pub expression: String,
    #[serde(default)]
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_message: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpressionView {
    pub id: i64,
    pub user_id: i64,
    pub expression: String,
    pub status: ExpressionStatus,
    pub result: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl From<Expression> for ExpressionView {
    fn from(expression: Expression) -> Self {
        Self {
            id: expression.id.0,
            user_id: expression.owner.0,
            expression: expression.source,
            status: expression.status,
            result: expression.result,
            error_message: expression.error_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionResponse {
    pub expression: ExpressionView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionListResponse {
    pub expressions: Vec<ExpressionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExpressionsQuery {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub tasks: TaskStatusCounts,
}
