//! SQLite-backed task repository.
//!
//! The durable store of the orchestrator. Expressions and tasks survive a
//! restart; `in_process` tasks left behind by a crash stay claimed (there is no
//! lease expiry).
//!
//! ## Concurrency
//! - Claims are a conditional `UPDATE ... WHERE status = 'wait'` checked through
//!   `rows_affected()`, so two connections can never claim the same task.
//! - A graph is written in one transaction together with the expression's
//!   transition to `calculating`.

use super::repository::{StoreError, StoreResult, TaskRepository};
use super::types::*;
use crate::compiler::graph::{PlannedOperand, TaskGraph};
use crate::compiler::types::Operator;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const CURRENT_VERSION: i32 = 1;

/// How many ready candidates one claim attempt looks at before giving up.
const CLAIM_CANDIDATES: i64 = 16;

const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS expressions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    expression TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'awaiting',
    result REAL NOT NULL DEFAULT 0,
    error_message TEXT NOT NULL DEFAULT '',
    sink_task_id INTEGER
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    expression_id INTEGER NOT NULL REFERENCES expressions(id),
    arg1 REAL NOT NULL DEFAULT 0,
    arg2 REAL NOT NULL DEFAULT 0,
    prev_task_id1 INTEGER REFERENCES tasks(id),
    prev_task_id2 INTEGER REFERENCES tasks(id),
    operation TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'wait',
    result REAL NOT NULL DEFAULT 0,
    error_message TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_expressions_user ON expressions(user_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_expression ON tasks(expression_id);
"#;

const SELECT_EXPRESSION: &str = "SELECT id, user_id, expression, status, result, error_message, sink_task_id FROM expressions";

const SELECT_TASK: &str = "SELECT id, expression_id, arg1, arg2, prev_task_id1, prev_task_id2, operation, status, result, error_message FROM tasks";

/// Connection settings for [`SqliteRepository`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file, or `:memory:` for a private in-memory database.
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// In-memory databases live inside a single connection.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_string_lossy() == ":memory:"
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub async fn open(config: StoreConfig) -> anyhow::Result<Self> {
        let is_memory = config.is_memory();

        if !is_memory {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
            }
        }

        let connection_str = if is_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", config.path.display())
        };

        let connect_options = SqliteConnectOptions::from_str(&connection_str)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(if is_memory {
            1
        } else {
            config.max_connections.max(1)
        });
        if is_memory {
            // Closing the only connection would drop the database.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to connect to database: {:?}", config.path))?;

        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(StoreConfig::in_memory()).await
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(CREATE_MIGRATIONS_TABLE)
            .execute(&self.pool)
            .await?;

        let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
            .fetch_optional(&self.pool)
            .await?;
        let current_version = row.and_then(|(v,)| v).unwrap_or(0);

        tracing::info!(
            current_version = current_version,
            target_version = CURRENT_VERSION,
            "Checking database migrations"
        );

        if current_version < 1 {
            tracing::info!("Applying migration v1: expressions and tasks");
            sqlx::raw_sql(MIGRATION_V1).execute(&self.pool).await?;
            sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                .bind(1)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", column, detail))
}

fn expression_from_row(row: &SqliteRow) -> StoreResult<Expression> {
    let status: String = row.try_get("status")?;
    Ok(Expression {
        id: ExpressionId(row.try_get("id")?),
        owner: UserId(row.try_get("user_id")?),
        source: row.try_get("expression")?,
        status: status.parse().map_err(|e| corrupt("expressions.status", e))?,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        sink_task_id: row.try_get::<Option<i64>, _>("sink_task_id")?.map(TaskId),
    })
}

fn operator_from_row(row: &SqliteRow) -> StoreResult<Operator> {
    let operation: String = row.try_get("operation")?;
    operation
        .parse()
        .map_err(|e| corrupt("tasks.operation", e))
}

fn task_status_from_row(row: &SqliteRow) -> StoreResult<TaskStatus> {
    let status: String = row.try_get("status")?;
    status.parse().map_err(|e| corrupt("tasks.status", e))
}

fn task_from_row(row: &SqliteRow) -> StoreResult<Task> {
    let prev1 = row.try_get::<Option<i64>, _>("prev_task_id1")?.map(TaskId);
    let prev2 = row.try_get::<Option<i64>, _>("prev_task_id2")?.map(TaskId);
    Ok(Task {
        id: TaskId(row.try_get("id")?),
        expression_id: ExpressionId(row.try_get("expression_id")?),
        left: Operand::from_columns(row.try_get("arg1")?, prev1),
        right: Operand::from_columns(row.try_get("arg2")?, prev2),
        operation: operator_from_row(row)?,
        status: task_status_from_row(row)?,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
    })
}

fn ready_task_from_row(row: &SqliteRow) -> StoreResult<ReadyTask> {
    Ok(ReadyTask {
        id: TaskId(row.try_get("id")?),
        expression_id: ExpressionId(row.try_get("expression_id")?),
        arg1: row.try_get("arg1")?,
        arg2: row.try_get("arg2")?,
        prev_task_id1: row.try_get::<Option<i64>, _>("prev_task_id1")?.map(TaskId),
        prev_task_id2: row.try_get::<Option<i64>, _>("prev_task_id2")?.map(TaskId),
        operation: operator_from_row(row)?,
        status: task_status_from_row(row)?,
        result: row.try_get("result")?,
    })
}

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn insert_expression(&self, source: &str, owner: UserId) -> StoreResult<ExpressionId> {
        let result = sqlx::query(
            "INSERT INTO expressions (user_id, expression, status) VALUES (?, ?, ?)",
        )
        .bind(owner.0)
        .bind(source)
        .bind(ExpressionStatus::Awaiting.as_str())
        .execute(&self.pool)
        .await?;

        Ok(ExpressionId(result.last_insert_rowid()))
    }

    async fn get_expression(&self, id: ExpressionId) -> StoreResult<Option<Expression>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_EXPRESSION))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(expression_from_row).transpose()
    }

    async fn list_expressions(&self, owner: UserId) -> StoreResult<Vec<Expression>> {
        let rows = sqlx::query(&format!(
            "{} WHERE user_id = ? ORDER BY id",
            SELECT_EXPRESSION
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(expression_from_row).collect()
    }

    async fn set_expression_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE expressions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExpressionNotFound(id));
        }
        Ok(())
    }

    async fn store_graph(&self, id: ExpressionId, graph: &TaskGraph) -> StoreResult<TaskId> {
        let mut tx = self.pool.begin().await?;
        let mut ids: Vec<TaskId> = Vec::with_capacity(graph.len());

        for (index, node) in graph.nodes.iter().enumerate() {
            let mut columns = [(0.0, None), (0.0, None)];
            for (slot, operand) in [node.left, node.right].into_iter().enumerate() {
                columns[slot] = match operand {
                    PlannedOperand::Literal(value) => (value, None),
                    PlannedOperand::Node(dependency) => {
                        let task_id = ids.get(dependency).copied().ok_or_else(|| {
                            corrupt(
                                "graph",
                                format!("node {} references later node {}", index, dependency),
                            )
                        })?;
                        (0.0, Some(task_id.0))
                    }
                };
            }
            let [(arg1, prev1), (arg2, prev2)] = columns;

            let result = sqlx::query(
                "INSERT INTO tasks (expression_id, arg1, arg2, prev_task_id1, prev_task_id2, operation, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.0)
            .bind(arg1)
            .bind(arg2)
            .bind(prev1)
            .bind(prev2)
            .bind(node.operation.symbol().to_string())
            .bind(TaskStatus::Wait.as_str())
            .execute(&mut *tx)
            .await?;

            ids.push(TaskId(result.last_insert_rowid()));
        }

        let sink = ids
            .get(graph.sink)
            .copied()
            .ok_or_else(|| corrupt("graph", "sink index out of range"))?;

        let updated = sqlx::query(
            "UPDATE expressions SET status = ?, sink_task_id = ? WHERE id = ? AND status = ?",
        )
        .bind(ExpressionStatus::Calculating.as_str())
        .bind(sink.0)
        .bind(id.0)
        .bind(ExpressionStatus::Awaiting.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Release the connection before looking the row up: an in-memory
            // pool holds a single one.
            tx.rollback().await?;
            return Err(match self.get_expression(id).await? {
                None => StoreError::ExpressionNotFound(id),
                Some(expression) => StoreError::ExpressionNotAwaiting {
                    id,
                    actual: expression.status,
                },
            });
        }

        tx.commit().await?;
        tracing::debug!("Stored {} tasks for expression {}", ids.len(), id);
        Ok(sink)
    }

    async fn claim_ready_task(&self) -> StoreResult<Option<ReadyTask>> {
        let candidates: Vec<(i64,)> = sqlx::query_as(
            "SELECT t.id FROM tasks t
             LEFT JOIN tasks p1 ON p1.id = t.prev_task_id1
             LEFT JOIN tasks p2 ON p2.id = t.prev_task_id2
             WHERE t.status = 'wait'
               AND (t.prev_task_id1 IS NULL OR p1.status = 'done')
               AND (t.prev_task_id2 IS NULL OR p2.status = 'done')
             ORDER BY t.id
             LIMIT ?",
        )
        .bind(CLAIM_CANDIDATES)
        .fetch_all(&self.pool)
        .await?;

        for (candidate,) in candidates {
            let claimed = sqlx::query("UPDATE tasks SET status = ? WHERE id = ? AND status = ?")
                .bind(TaskStatus::InProcess.as_str())
                .bind(candidate)
                .bind(TaskStatus::Wait.as_str())
                .execute(&self.pool)
                .await?;

            if claimed.rows_affected() != 1 {
                tracing::trace!("Task {} already claimed", candidate);
                continue;
            }

            // Predecessors are done and terminal rows never change again.
            let row = sqlx::query(
                "SELECT t.id, t.expression_id,
                        COALESCE(p1.result, t.arg1) AS arg1,
                        COALESCE(p2.result, t.arg2) AS arg2,
                        t.prev_task_id1, t.prev_task_id2,
                        t.operation, t.status, t.result
                 FROM tasks t
                 LEFT JOIN tasks p1 ON p1.id = t.prev_task_id1
                 LEFT JOIN tasks p2 ON p2.id = t.prev_task_id2
                 WHERE t.id = ?",
            )
            .bind(candidate)
            .fetch_one(&self.pool)
            .await?;

            return ready_task_from_row(&row).map(Some);
        }

        Ok(None)
    }

    async fn record_result(&self, id: TaskId, outcome: &Outcome) -> StoreResult<Task> {
        let (result, error_message) = outcome.columns();
        let updated = sqlx::query(
            "UPDATE tasks SET status = ?, result = ?, error_message = ? WHERE id = ? AND status = ?",
        )
        .bind(outcome.task_status().as_str())
        .bind(result)
        .bind(error_message)
        .bind(id.0)
        .bind(TaskStatus::InProcess.as_str())
        .execute(&self.pool)
        .await?;

        let task = self.get_task(id).await?.ok_or(StoreError::TaskNotFound(id))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                task_id: id,
                expected: TaskStatus::InProcess,
                actual: task.status,
            });
        }

        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_TASK))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn tasks_for_expression(&self, id: ExpressionId) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "{} WHERE expression_id = ? ORDER BY id",
            SELECT_TASK
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn finalize_expression(&self, id: ExpressionId, outcome: &Outcome) -> StoreResult<bool> {
        let (result, error_message) = outcome.columns();
        let updated = sqlx::query(
            "UPDATE expressions SET status = ?, result = ?, error_message = ?
             WHERE id = ? AND status NOT IN ('done', 'failed')",
        )
        .bind(outcome.expression_status().as_str())
        .bind(result)
        .bind(error_message)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        match self.get_expression(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::ExpressionNotFound(id)),
        }
    }

    async fn task_status_counts(&self) -> StoreResult<TaskStatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = TaskStatusCounts::default();
        for (status, count) in rows {
            let status: TaskStatus = status.parse().map_err(|e| corrupt("tasks.status", e))?;
            counts.add(status, count.max(0) as usize);
        }
        Ok(counts)
    }
}
