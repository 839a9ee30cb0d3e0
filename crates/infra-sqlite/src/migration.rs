// Migration Runner

use cronloom_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Run database migrations (idempotent).
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Check if schema_version table exists
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(store_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(store_error)?
            .unwrap_or(0)
    } else {
        0
    };

    if current_version < 1 {
        info!("Applying migration 001: Initial schema");
        apply_migration(pool, include_str!("../migrations/001_initial_schema.sql")).await?;
    }

    Ok(())
}

/// Apply a single migration SQL file inside one transaction.
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(store_error)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }
    }

    tx.commit().await.map_err(store_error)
}

fn store_error(err: sqlx::Error) -> AppError {
    AppError::Store(format!("Migration failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cron_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_run_migrations_twice_is_idempotent() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[tokio::test]
    async fn test_schema_enforces_exclusivity() {
        let pool = create_pool(":memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        // both schedule columns set: the CHECK constraint must reject it
        let result = sqlx::query(
            "INSERT INTO cron_jobs (id, cron_expression, specific_time, identifier, status, \
             next_run, run_count, created_at, updated_at) \
             VALUES ('x', '* * * * *', 123, 'both', 'active', 1, 0, 1, 1)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());

        // neither set is rejected as well
        let result = sqlx::query(
            "INSERT INTO cron_jobs (id, identifier, status, next_run, run_count, created_at, \
             updated_at) VALUES ('y', 'neither', 'active', 1, 0, 1, 1)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());

        // unknown status rejected
        let result = sqlx::query(
            "INSERT INTO cron_jobs (id, cron_expression, identifier, status, next_run, \
             run_count, created_at, updated_at) \
             VALUES ('z', '* * * * *', 'bad-status', 'running', 1, 0, 1, 1)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
