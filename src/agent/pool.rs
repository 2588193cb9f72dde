//! Worker Pool Implementation
//!
//! Runs a fixed number of worker loops against a [`Coordinator`].
//!
//! ## Responsibilities
//! - **Polling**: each loop fetches one task at a time and sleeps the poll
//!   interval between iterations, whether or not it found work.
//! - **Limiting**: a pool-wide semaphore sized to the pool bounds the number of
//!   tasks in flight.
//! - **Reporting**: results are submitted with a fixed backoff until the
//!   orchestrator accepts or definitively rejects them.

use super::client::{ClientError, Coordinator};
use super::compute::{self, ComputeError, OperationDelays};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker loops and size of the concurrency limiter.
    pub pool_size: usize,
    /// Wait between iterations of one loop.
    pub poll_interval: Duration,
    /// Wait between attempts to submit one result.
    pub submit_backoff: Duration,
    pub delays: OperationDelays,
}

impl PoolConfig {
    /// A pool size of zero is raised to one.
    pub fn new(pool_size: usize, poll_interval: Duration, delays: OperationDelays) -> Self {
        Self {
            pool_size: pool_size.max(1),
            poll_interval,
            submit_backoff: poll_interval,
            delays,
        }
    }
}

/// What one loop iteration did.
#[derive(Debug)]
pub enum Iteration {
    /// Nothing was ready.
    Idle,
    /// The fetch failed; the error was logged.
    FetchFailed,
    /// The task was malformed and dropped without a submission.
    Discarded(ComputeError),
    /// The result was accepted.
    Submitted { task_id: i64 },
    /// The orchestrator refused the result for good.
    Rejected { task_id: i64, error: ClientError },
    /// The pool was shut down.
    Stopped,
}

pub struct WorkerPool {
    coordinator: Arc<dyn Coordinator>,
    config: PoolConfig,
    limiter: Semaphore,
}

impl WorkerPool {
    pub fn new(coordinator: Arc<dyn Coordinator>, config: PoolConfig) -> Arc<Self> {
        let limiter = Semaphore::new(config.pool_size);
        Arc::new(Self {
            coordinator,
            config,
            limiter,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawns the worker loops and returns their handles immediately.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} workers", self.config.pool_size);

        (0..self.config.pool_size)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id).await;
                })
            })
            .collect()
    }

    /// Makes every loop exit at its next iteration.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.limiter.is_closed()
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::info!("Worker {} started", worker_id);

        loop {
            if let Iteration::Stopped = self.run_once(worker_id).await {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        tracing::info!("Worker {} stopped", worker_id);
    }

    /// One fetch-execute-submit cycle, holding one limiter slot throughout.
    pub async fn run_once(&self, worker_id: usize) -> Iteration {
        let Ok(_permit) = self.limiter.acquire().await else {
            return Iteration::Stopped;
        };

        let task = match self.coordinator.fetch_task().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::trace!("Worker {} found no task", worker_id);
                return Iteration::Idle;
            }
            Err(e) => {
                tracing::warn!("Worker {} failed to fetch a task: {}", worker_id, e);
                return Iteration::FetchFailed;
            }
        };

        tracing::debug!(
            "Worker {} executing task {}: {} {} {}",
            worker_id,
            task.id,
            task.arg1,
            task.operation,
            task.arg2
        );

        let computation = match compute::execute(&task, &self.config.delays).await {
            Ok(computation) => computation,
            Err(e) => {
                tracing::error!("Worker {} discarded a task: {}", worker_id, e);
                return Iteration::Discarded(e);
            }
        };

        let task_id = computation.task_id;
        loop {
            match self
                .coordinator
                .submit_result(task_id, computation.result, &computation.error_message)
                .await
            {
                Ok(()) => {
                    tracing::debug!("Worker {} submitted task {}", worker_id, task_id);
                    return Iteration::Submitted { task_id };
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!(
                        "Worker {} result for task {} rejected: {}",
                        worker_id,
                        task_id,
                        error
                    );
                    return Iteration::Rejected { task_id, error };
                }
                Err(e) => {
                    if self.is_shut_down() {
                        tracing::warn!(
                            "Worker {} dropping result of task {} on shutdown: {}",
                            worker_id,
                            task_id,
                            e
                        );
                        return Iteration::Stopped;
                    }
                    tracing::warn!(
                        "Worker {} failed to submit task {}, retrying: {}",
                        worker_id,
                        task_id,
                        e
                    );
                    tokio::time::sleep(self.config.submit_backoff).await;
                }
            }
        }
    }
}
