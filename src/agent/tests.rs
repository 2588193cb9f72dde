//! Agent Module Tests
//!
//! ## Test Scopes
//! - **Compute**: operator dispatch, simulated delays, malformed tasks.
//! - **Pool iteration**: fetch outcomes and the submit retry policy, driven by a
//!   scripted coordinator.
//! - **End to end**: worker pools against a real scheduler, in-process and over HTTP.

#[cfg(test)]
mod tests {
    use crate::agent::client::{ClientError, Coordinator, HttpCoordinator, LocalCoordinator};
    use crate::agent::compute::{ComputeError, OperationDelays, execute, parse_task};
    use crate::agent::pool::{Iteration, PoolConfig, WorkerPool};
    use crate::compiler::types::Operator;
    use crate::scheduler::handlers::router;
    use crate::scheduler::memory::MemoryRepository;
    use crate::scheduler::protocol::TaskMessage;
    use crate::scheduler::service::Scheduler;
    use crate::scheduler::types::*;

    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn message(id: i64, arg1: f64, operation: &str, arg2: f64) -> TaskMessage {
        TaskMessage {
            id,
            expression_id: 1,
            arg1,
            arg2,
            prev_task_id1: 0,
            prev_task_id2: 0,
            operation: operation.to_string(),
            status: "in_process".to_string(),
            result: 0.0,
        }
    }

    fn fast_config(pool_size: usize) -> PoolConfig {
        let mut config = PoolConfig::new(pool_size, Duration::from_millis(5), OperationDelays::zero());
        config.submit_backoff = Duration::from_millis(1);
        config
    }

    /// Coordinator that replays canned fetch answers and records submissions.
    #[derive(Default)]
    struct ScriptedCoordinator {
        fetches: Mutex<VecDeque<Result<Option<TaskMessage>, ClientError>>>,
        submit_errors: Mutex<VecDeque<ClientError>>,
        submissions: Mutex<Vec<(i64, f64, String)>>,
        submit_calls: AtomicUsize,
    }

    impl ScriptedCoordinator {
        fn with_fetch(answer: Result<Option<TaskMessage>, ClientError>) -> Self {
            let coordinator = Self::default();
            coordinator.fetches.lock().unwrap().push_back(answer);
            coordinator
        }

        fn fail_submit(&self, error: ClientError) {
            self.submit_errors.lock().unwrap().push_back(error);
        }
    }

    #[async_trait]
    impl Coordinator for ScriptedCoordinator {
        async fn fetch_task(&self) -> Result<Option<TaskMessage>, ClientError> {
            self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn submit_result(
            &self,
            task_id: i64,
            result: f64,
            error_message: &str,
        ) -> Result<(), ClientError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.submit_errors.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.submissions
                .lock()
                .unwrap()
                .push((task_id, result, error_message.to_string()));
            Ok(())
        }
    }

    async fn wait_until_settled(scheduler: &Scheduler, ids: &[ExpressionId]) {
        for _ in 0..500 {
            let mut settled = true;
            for id in ids {
                if !scheduler.get_expression(*id).await.unwrap().status.is_terminal() {
                    settled = false;
                }
            }
            if settled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expressions did not settle");
    }

    // ============================================================
    // COMPUTE
    // ============================================================

    #[tokio::test]
    async fn test_execute_applies_each_operator() {
        let delays = OperationDelays::zero();

        let cases = [("+", 7.0), ("-", 3.0), ("*", 10.0), ("/", 2.5)];
        for (operation, expected) in cases {
            let computation = execute(&message(1, 5.0, operation, 2.0), &delays).await.unwrap();

            assert_eq!(computation.result, expected, "{}", operation);
            assert!(computation.error_message.is_empty());
            assert_eq!(computation.task_id, 1);
        }
    }

    #[tokio::test]
    async fn test_execute_reports_division_by_zero_as_result() {
        let computation = execute(&message(4, 5.0, "/", 0.0), &OperationDelays::zero())
            .await
            .unwrap();

        assert_eq!(computation.result, 0.0);
        assert_eq!(computation.error_message, "division by zero");
    }

    #[tokio::test]
    async fn test_execute_reports_overflow_as_result() {
        let computation = execute(&message(6, 1e300, "*", 1e300), &OperationDelays::zero())
            .await
            .unwrap();

        assert_eq!(computation.result, 0.0);
        assert_eq!(computation.error_message, "result out of range");
    }

    #[test]
    fn test_parse_task_rejects_malformed_tasks() {
        assert_eq!(
            parse_task(&message(0, 1.0, "+", 1.0)),
            Err(ComputeError::InvalidTask(0))
        );
        assert_eq!(
            parse_task(&message(3, 1.0, "", 1.0)),
            Err(ComputeError::EmptyOperation(3))
        );
        assert_eq!(
            parse_task(&message(3, 1.0, "%", 1.0)),
            Err(ComputeError::UnknownOperation {
                task_id: 3,
                operation: "%".to_string()
            })
        );
        assert_eq!(parse_task(&message(3, 1.0, "*", 1.0)), Ok(Operator::Multiply));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_waits_for_operator_delay() {
        // ARRANGE
        let delays = OperationDelays {
            addition: Duration::from_millis(100),
            subtraction: Duration::from_millis(200),
            multiplication: Duration::from_millis(300),
            division: Duration::from_millis(400),
        };
        let start = tokio::time::Instant::now();

        // ACT
        execute(&message(1, 6.0, "*", 7.0), &delays).await.unwrap();

        // ASSERT
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_pool_config_clamps_size() {
        let config = PoolConfig::new(0, Duration::from_secs(1), OperationDelays::default());

        assert_eq!(config.pool_size, 1);
        assert_eq!(config.delays.division, Duration::from_millis(100));
    }

    #[test]
    fn test_client_error_retryability() {
        assert!(ClientError::Transport("down".into()).is_retryable());
        assert!(ClientError::Server("db".into()).is_retryable());
        assert!(!ClientError::InvalidArgument("id".into()).is_retryable());
        assert!(!ClientError::Conflict("done".into()).is_retryable());
    }

    // ============================================================
    // POOL ITERATION
    // ============================================================

    #[tokio::test]
    async fn test_run_once_idle_when_no_task() {
        let pool = WorkerPool::new(Arc::new(ScriptedCoordinator::default()), fast_config(1));

        assert!(matches!(pool.run_once(0).await, Iteration::Idle));
    }

    #[tokio::test]
    async fn test_run_once_reports_fetch_failure() {
        let coordinator = ScriptedCoordinator::with_fetch(Err(ClientError::Server("db".into())));
        let pool = WorkerPool::new(Arc::new(coordinator), fast_config(1));

        assert!(matches!(pool.run_once(0).await, Iteration::FetchFailed));
    }

    #[tokio::test]
    async fn test_run_once_discards_malformed_task_without_submitting() {
        // ARRANGE
        let coordinator = Arc::new(ScriptedCoordinator::with_fetch(Ok(Some(message(
            5, 1.0, "", 2.0,
        )))));
        let pool = WorkerPool::new(coordinator.clone(), fast_config(1));

        // ACT
        let iteration = pool.run_once(0).await;

        // ASSERT
        assert!(matches!(
            iteration,
            Iteration::Discarded(ComputeError::EmptyOperation(5))
        ));
        assert_eq!(coordinator.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_once_retries_submission_on_transport_errors() {
        // ARRANGE
        let coordinator = Arc::new(ScriptedCoordinator::with_fetch(Ok(Some(message(
            9, 3.0, "*", 4.0,
        )))));
        coordinator.fail_submit(ClientError::Transport("refused".into()));
        coordinator.fail_submit(ClientError::Server("busy".into()));
        let pool = WorkerPool::new(coordinator.clone(), fast_config(1));

        // ACT
        let iteration = pool.run_once(0).await;

        // ASSERT
        assert!(matches!(iteration, Iteration::Submitted { task_id: 9 }));
        assert_eq!(coordinator.submit_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *coordinator.submissions.lock().unwrap(),
            vec![(9, 12.0, String::new())]
        );
    }

    #[tokio::test]
    async fn test_run_once_stops_retrying_on_conflict() {
        let coordinator = Arc::new(ScriptedCoordinator::with_fetch(Ok(Some(message(
            2, 1.0, "+", 1.0,
        )))));
        coordinator.fail_submit(ClientError::Conflict("task already done".into()));
        let pool = WorkerPool::new(coordinator.clone(), fast_config(1));

        let iteration = pool.run_once(0).await;

        assert!(matches!(
            iteration,
            Iteration::Rejected {
                task_id: 2,
                error: ClientError::Conflict(_)
            }
        ));
        assert_eq!(coordinator.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_once_after_shutdown_stops() {
        let pool = WorkerPool::new(Arc::new(ScriptedCoordinator::default()), fast_config(2));

        pool.shutdown();

        assert!(matches!(pool.run_once(0).await, Iteration::Stopped));
    }

    // ============================================================
    // END TO END
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_local_pool_evaluates_expressions() {
        // ARRANGE
        let scheduler = Scheduler::new(Arc::new(MemoryRepository::new()));
        let ok = scheduler
            .submit_expression("2*(3+4)-1", UserId(1))
            .await
            .unwrap();
        let failing = scheduler
            .submit_expression("(8/0)+(1+1)", UserId(1))
            .await
            .unwrap();

        let coordinator = Arc::new(LocalCoordinator::new(scheduler.clone()));
        let pool = WorkerPool::new(coordinator, fast_config(3));

        // ACT
        let handles = pool.clone().start();
        wait_until_settled(&scheduler, &[ok, failing]).await;
        pool.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }

        // ASSERT
        let ok = scheduler.get_expression(ok).await.unwrap();
        assert_eq!(ok.status, ExpressionStatus::Done);
        assert_eq!(ok.result, 13.0);

        let failing = scheduler.get_expression(failing).await.unwrap();
        assert_eq!(failing.status, ExpressionStatus::Failed);
        assert_eq!(failing.error_message, "division by zero");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_pool_evaluates_expression() {
        // ARRANGE: serve the protocol on an ephemeral port
        let scheduler = Scheduler::new(Arc::new(MemoryRepository::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(scheduler.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let coordinator = Arc::new(HttpCoordinator::new(
            format!("http://{}/", addr),
            Duration::from_secs(2),
        ));
        assert!(coordinator.fetch_task().await.unwrap().is_none());

        let id = scheduler
            .submit_expression("(10-4)/3", UserId(2))
            .await
            .unwrap();

        // ACT
        let pool = WorkerPool::new(coordinator.clone(), fast_config(2));
        let handles = pool.clone().start();
        wait_until_settled(&scheduler, &[id]).await;
        pool.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }

        // ASSERT
        let expression = scheduler.get_expression(id).await.unwrap();
        assert_eq!(expression.status, ExpressionStatus::Done);
        assert_eq!(expression.result, 2.0);

        let sink = expression.sink_task_id.unwrap();
        assert_eq!(coordinator.fetch_result(sink.0).await.unwrap(), Some(2.0));

        let repeat = coordinator.submit_result(sink.0, 2.0, "").await;
        assert!(matches!(repeat, Err(ClientError::Conflict(_))));
        let invalid = coordinator.submit_result(0, 2.0, "").await;
        assert!(matches!(invalid, Err(ClientError::InvalidArgument(_))));
    }

    async fn serve(scheduler: Arc<Scheduler>) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(scheduler);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_fetch_from_wrong_path_is_not_idle() {
        // ARRANGE: a base URL under which the protocol routes do not exist
        let scheduler = Scheduler::new(Arc::new(MemoryRepository::new()));
        let addr = serve(scheduler.clone()).await;
        let misrouted = HttpCoordinator::new(format!("http://{}/wrong", addr), Duration::from_secs(2));
        let routed = HttpCoordinator::new(format!("http://{}", addr), Duration::from_secs(2));

        // ACT
        let misrouted_fetch = misrouted.fetch_task().await;
        let routed_fetch = routed.fetch_task().await;

        // ASSERT
        assert!(matches!(misrouted_fetch, Err(ClientError::Server(_))));
        assert!(misrouted_fetch.unwrap_err().is_retryable());
        assert!(matches!(routed_fetch, Ok(None)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_infinite_result_fails_expression() {
        // ARRANGE
        let scheduler = Scheduler::new(Arc::new(MemoryRepository::new()));
        let addr = serve(scheduler.clone()).await;
        let coordinator = HttpCoordinator::new(format!("http://{}", addr), Duration::from_secs(2));
        let id = scheduler.submit_expression("1+2", UserId(1)).await.unwrap();
        let task = coordinator.fetch_task().await.unwrap().unwrap();

        // ACT
        let submitted = coordinator.submit_result(task.id, f64::INFINITY, "").await;

        // ASSERT
        assert!(submitted.is_ok());
        let expression = scheduler.get_expression(id).await.unwrap();
        assert_eq!(expression.status, ExpressionStatus::Failed);
        assert_eq!(expression.error_message, "result out of range");
        assert!(coordinator.fetch_task().await.unwrap().is_none());
    }
}
