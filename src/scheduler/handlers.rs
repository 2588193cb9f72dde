use super::protocol::*;
use super::repository::StoreError;
use super::service::{Scheduler, SchedulerError};
use super::types::*;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Routes of the worker protocol and the expression API.
pub fn router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route(ENDPOINT_TASK_FETCH, post(handle_fetch_task))
        .route(ENDPOINT_TASK_RESULT, post(handle_submit_result))
        .route(ENDPOINT_TASK_RESULT_GET, get(handle_fetch_result))
        .route(ENDPOINT_CALCULATE, post(handle_calculate))
        .route(ENDPOINT_EXPRESSIONS, get(handle_list_expressions))
        .route(ENDPOINT_EXPRESSION_GET, get(handle_get_expression))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(Extension(scheduler))
}

pub(crate) fn error_response(e: &SchedulerError) -> ApiError {
    let status = match e {
        SchedulerError::InvalidTaskId(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::Store(StoreError::TaskNotFound(_))
        | SchedulerError::Store(StoreError::ExpressionNotFound(_)) => StatusCode::NOT_FOUND,
        SchedulerError::Store(StoreError::InvalidTransition { .. })
        | SchedulerError::Store(StoreError::ExpressionNotAwaiting { .. }) => StatusCode::CONFLICT,
        SchedulerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Storage failure: {}", e);
    } else {
        tracing::debug!("Request rejected ({}): {}", status, e);
    }

    (status, Json(ErrorResponse::new(e.to_string())))
}

pub async fn handle_fetch_task(
    Extension(scheduler): Extension<Arc<Scheduler>>,
) -> Result<Json<TaskMessage>, ApiError> {
    match scheduler.fetch_task().await {
        Ok(Some(task)) => Ok(Json(TaskMessage::from(task))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(NO_TASKS_AVAILABLE)),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

pub async fn handle_submit_result(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Json(req): Json<SubmitResultRequest>,
) -> Result<Json<SubmitResultResponse>, ApiError> {
    scheduler
        .submit_result(req.task_id, req.result, &req.error_message)
        .await
        .map(|_| Json(SubmitResultResponse { success: true }))
        .map_err(|e| error_response(&e))
}

pub async fn handle_fetch_result(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Path(task_id): Path<i64>,
) -> Result<Json<FetchResultResponse>, ApiError> {
    let result = scheduler
        .fetch_result(task_id)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(FetchResultResponse {
        success: result.ready,
        result: result.result,
    }))
}

pub async fn handle_calculate(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Json(req): Json<CalculateRequest>,
) -> Result<(StatusCode, Json<CalculateResponse>), ApiError> {
    match scheduler
        .submit_expression(&req.expression, UserId(req.user_id))
        .await
    {
        Ok(id) => {
            tracing::info!("Accepted expression {} from user {}", id, req.user_id);
            Ok((StatusCode::CREATED, Json(CalculateResponse { id: id.0 })))
        }
        Err(SchedulerError::Compile(e)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::with_message(
                "expression is not valid",
                e.to_string(),
            )),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

pub async fn handle_get_expression(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Path(id): Path<i64>,
) -> Result<Json<ExpressionResponse>, ApiError> {
    let expression = scheduler
        .get_expression(ExpressionId(id))
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(ExpressionResponse {
        expression: expression.into(),
    }))
}

pub async fn handle_list_expressions(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Query(query): Query<ListExpressionsQuery>,
) -> Result<Json<ExpressionListResponse>, ApiError> {
    let expressions = scheduler
        .list_expressions(UserId(query.user_id))
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(ExpressionListResponse {
        expressions: expressions.into_iter().map(ExpressionView::from).collect(),
    }))
}

pub async fn handle_health(
    Extension(scheduler): Extension<Arc<Scheduler>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let tasks = scheduler
        .task_status_counts()
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        tasks,
    }))
}
