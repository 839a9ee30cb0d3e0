// SQLite JobStore Implementation

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cronloom_core::domain::{Job, JobStatus};
use cronloom_core::error::{AppError, Result};
use cronloom_core::port::{JobStore, StatusCounts};
use sqlx::SqlitePool;

use crate::migration::run_migrations;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Store(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" | "531" => AppError::Store(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Store(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Store(format!("Database full: {}", db_err.message())),
                    _ => AppError::Store(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Store(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Store("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Store(format!("Column not found: {col}")),
        _ => AppError::Store(err.to_string()),
    }
}

/// SQLite-backed job store. `init` must run before any other operation.
pub struct SqliteJobStore {
    pool: SqlitePool,
    initialized: AtomicBool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::NotInitialized)
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn init(&self) -> Result<()> {
        run_migrations(&self.pool).await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, job: &Job) -> Result<()> {
        self.ensure_ready()?;
        sqlx::query(
            r#"
            INSERT INTO cron_jobs (
                id, cron_expression, specific_time, identifier, status,
                next_run, last_run, run_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                id = excluded.id,
                cron_expression = excluded.cron_expression,
                specific_time = excluded.specific_time,
                status = excluded.status,
                next_run = excluded.next_run,
                last_run = excluded.last_run,
                run_count = excluded.run_count,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.cron_expression)
        .bind(job.specific_time)
        .bind(&job.identifier)
        .bind(job.status.as_str())
        .bind(job.next_run)
        .bind(job.last_run)
        .bind(job.run_count)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Job>> {
        self.ensure_ready()?;
        let row =
            sqlx::query_as::<_, JobRow>("SELECT * FROM cron_jobs WHERE identifier = ?")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn transition_status(
        &self,
        identifier: &str,
        allowed_from: &[JobStatus],
        to: JobStatus,
        updated_at: i64,
    ) -> Result<u64> {
        self.ensure_ready()?;
        if allowed_from.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; allowed_from.len()].join(", ");
        let sql = format!(
            "UPDATE cron_jobs SET status = ?, updated_at = ? \
             WHERE identifier = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(updated_at)
            .bind(identifier);
        for status in allowed_from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn apply_post_execution(
        &self,
        identifier: &str,
        id: &str,
        last_run: i64,
        next_run: i64,
        status: JobStatus,
        updated_at: i64,
    ) -> Result<u64> {
        self.ensure_ready()?;
        // Single atomic statement. The status gate keeps a finished
        // execution from overwriting a concurrent pause/cancel; the id gate
        // keeps a firing from a replaced record off its successor (upsert
        // assigns a fresh id on every re-schedule).
        let result = sqlx::query(
            r#"
            UPDATE cron_jobs
            SET last_run = ?, next_run = ?, run_count = run_count + 1,
                status = ?, updated_at = ?
            WHERE identifier = ? AND id = ? AND status = 'active'
            "#,
        )
        .bind(last_run)
        .bind(next_run)
        .bind(status.as_str())
        .bind(updated_at)
        .bind(identifier)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn due_in_window(&self, window_end: i64, limit: u32) -> Result<Vec<Job>> {
        self.ensure_ready()?;
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM cron_jobs
            WHERE status = 'active' AND next_run <= ?
            ORDER BY next_run ASC
            LIMIT ?
            "#,
        )
        .bind(window_end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        self.ensure_ready()?;
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM cron_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match JobStatus::from_str(&status)? {
                JobStatus::Active => counts.active = count,
                JobStatus::Paused => counts.paused = count,
                JobStatus::Cancelled => counts.cancelled = count,
                JobStatus::Completed => counts.completed = count,
            }
        }
        Ok(counts)
    }

    async fn count_active(&self) -> Result<i64> {
        self.ensure_ready()?;
        sqlx::query_scalar("SELECT COUNT(*) FROM cron_jobs WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_completed(&self) -> Result<i64> {
        self.ensure_ready()?;
        sqlx::query_scalar("SELECT COUNT(*) FROM cron_jobs WHERE status = 'completed'")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn sum_run_count(&self) -> Result<i64> {
        self.ensure_ready()?;
        sqlx::query_scalar("SELECT COALESCE(SUM(run_count), 0) FROM cron_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_active_due_by(&self, window_end: i64) -> Result<i64> {
        self.ensure_ready()?;
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM cron_jobs WHERE status = 'active' AND next_run <= ?",
        )
        .bind(window_end)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.ensure_ready()?;
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM cron_jobs WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn delete_terminal(&self, status: JobStatus, updated_at_cutoff: i64) -> Result<u64> {
        self.ensure_ready()?;
        if !status.is_terminal() {
            return Err(AppError::Internal(format!(
                "Refusing retention delete of non-terminal status '{status}'"
            )));
        }
        let result = sqlx::query("DELETE FROM cron_jobs WHERE status = ? AND updated_at < ?")
            .bind(status.as_str())
            .bind(updated_at_cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    cron_expression: Option<String>,
    specific_time: Option<i64>,
    identifier: String,
    status: String,
    next_run: i64,
    last_run: Option<i64>,
    run_count: i64,
    created_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = JobStatus::from_str(&self.status)?;
        Ok(Job {
            id: self.id,
            identifier: self.identifier,
            cron_expression: self.cron_expression,
            specific_time: self.specific_time,
            status,
            next_run: self.next_run,
            last_run: self.last_run,
            run_count: self.run_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
