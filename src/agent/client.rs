//! Worker-side view of the orchestrator.
//!
//! [`Coordinator`] is what a worker loop talks to. [`HttpCoordinator`] reaches a
//! remote orchestrator over the JSON protocol; [`LocalCoordinator`] calls a
//! [`Scheduler`] in the same process.

use crate::scheduler::protocol::*;
use crate::scheduler::repository::StoreError;
use crate::scheduler::service::{Scheduler, SchedulerError};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    /// The request can never succeed (bad or unknown task id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The task is not in a state that accepts the request.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("server error: {0}")]
    Server(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Server(_))
    }
}

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Claims one task. `Ok(None)` when nothing is ready.
    async fn fetch_task(&self) -> Result<Option<TaskMessage>, ClientError>;

    async fn submit_result(
        &self,
        task_id: i64,
        result: f64,
        error_message: &str,
    ) -> Result<(), ClientError>;
}

const REQUEST_ATTEMPTS: usize = 3;

pub struct HttpCoordinator {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Read-only lookup of a task's value. `None` while the task is not done.
    pub async fn fetch_result(&self, task_id: i64) -> Result<Option<f64>, ClientError> {
        let url = format!("{}{}", self.base_url, task_result_path(task_id));
        let resp = self.get_with_retry(url, REQUEST_ATTEMPTS).await?;

        match resp.status() {
            StatusCode::OK => {
                let body: FetchResultResponse = resp
                    .json()
                    .await
                    .map_err(|e| ClientError::Server(format!("malformed response: {}", e)))?;
                Ok(body.success.then_some(body.result))
            }
            status => Err(status_error(status, resp).await),
        }
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        attempts: usize,
    ) -> Result<reqwest::Response, ClientError> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(ClientError::Transport(e.to_string()));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(ClientError::Transport("retry attempts exhausted".to_string()))
    }

    async fn get_with_retry(
        &self,
        url: String,
        attempts: usize,
    ) -> Result<reqwest::Response, ClientError> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(ClientError::Transport(e.to_string()));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(ClientError::Transport("retry attempts exhausted".to_string()))
    }
}

/// Maps a non-success response onto the error kinds the worker loop acts on.
async fn status_error(status: StatusCode, resp: reqwest::Response) -> ClientError {
    let message = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };

    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::InvalidArgument(message)
        }
        StatusCode::CONFLICT => ClientError::Conflict(message),
        _ => ClientError::Server(message),
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn fetch_task(&self) -> Result<Option<TaskMessage>, ClientError> {
        let url = format!("{}{}", self.base_url, ENDPOINT_TASK_FETCH);
        let resp = self
            .post_with_retry(url, &serde_json::json!({}), REQUEST_ATTEMPTS)
            .await?;

        match resp.status() {
            StatusCode::OK => resp
                .json::<TaskMessage>()
                .await
                .map(Some)
                .map_err(|e| ClientError::Server(format!("malformed task: {}", e))),
            StatusCode::NOT_FOUND => match resp.json::<ErrorResponse>().await {
                Ok(body) if body.error == NO_TASKS_AVAILABLE => Ok(None),
                // Anything else is a wrong URL or a foreign server.
                Ok(body) => Err(ClientError::Server(format!("not found: {}", body.error))),
                Err(_) => Err(ClientError::Server(format!(
                    "{} answered 404 without a protocol body",
                    self.base_url
                ))),
            },
            status => Err(status_error(status, resp).await),
        }
    }

    async fn submit_result(
        &self,
        task_id: i64,
        result: f64,
        error_message: &str,
    ) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, ENDPOINT_TASK_RESULT);
        let request = SubmitResultRequest {
            task_id,
            result,
            error_message: error_message.to_string(),
        };
        let resp = self
            .post_with_retry(url, &request, REQUEST_ATTEMPTS)
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            status => Err(status_error(status, resp).await),
        }
    }
}

/// Runs the worker protocol against an in-process scheduler.
pub struct LocalCoordinator {
    scheduler: Arc<Scheduler>,
}

impl LocalCoordinator {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

impl From<SchedulerError> for ClientError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvalidTaskId(_)
            | SchedulerError::Store(StoreError::TaskNotFound(_))
            | SchedulerError::Store(StoreError::ExpressionNotFound(_)) => {
                ClientError::InvalidArgument(e.to_string())
            }
            SchedulerError::Store(StoreError::InvalidTransition { .. })
            | SchedulerError::Store(StoreError::ExpressionNotAwaiting { .. }) => {
                ClientError::Conflict(e.to_string())
            }
            SchedulerError::Compile(_) | SchedulerError::Store(_) => {
                ClientError::Server(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    async fn fetch_task(&self) -> Result<Option<TaskMessage>, ClientError> {
        Ok(self.scheduler.fetch_task().await?.map(TaskMessage::from))
    }

    async fn submit_result(
        &self,
        task_id: i64,
        result: f64,
        error_message: &str,
    ) -> Result<(), ClientError> {
        self.scheduler
            .submit_result(task_id, result, error_message)
            .await?;
        Ok(())
    }
}
