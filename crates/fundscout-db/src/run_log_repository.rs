use chrono::{DateTime, Utc};
use fundscout_core::error::AppError;
use fundscout_core::models::{RunStatus, ScraperRunLog};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Scraper run logs in PostgreSQL.
#[derive(Clone)]
pub struct RunLogRepository {
    pool: Pool<Postgres>,
}

impl RunLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent runs, newest first, optionally for one source.
    pub async fn recent_runs(
        &self,
        source_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScraperRunLog>, AppError> {
        let rows = sqlx::query_as::<_, RunLogRow>(
            r#"
            SELECT * FROM scraper_runs
            WHERE ($1::VARCHAR IS NULL OR source_name = $1)
            ORDER BY start_time DESC
            LIMIT $2
            "#,
        )
        .bind(source_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScraperRunLog>, AppError> {
        let row = sqlx::query_as::<_, RunLogRow>("SELECT * FROM scraper_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RunLogRow {
    id: Uuid,
    source_name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    status: String,
    grants_found: i32,
    grants_added: i32,
    grants_updated: i32,
    error_message: Option<String>,
    metadata: serde_json::Value,
}

impl From<RunLogRow> for ScraperRunLog {
    fn from(row: RunLogRow) -> Self {
        ScraperRunLog {
            id: row.id,
            source_name: row.source_name,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_seconds: row.duration_seconds,
            status: row.status.parse().unwrap_or(RunStatus::Error),
            grants_found: row.grants_found.max(0) as u32,
            grants_added: row.grants_added.max(0) as u32,
            grants_updated: row.grants_updated.max(0) as u32,
            error_message: row.error_message,
            metadata: row.metadata,
        }
    }
}

// -- Trait implementation --

impl fundscout_core::traits::RunLogStore for RunLogRepository {
    async fn create_run_log(&self, log: &ScraperRunLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scraper_runs (id, source_name, start_time, status, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(log.id)
        .bind(&log.source_name)
        .bind(log.start_time)
        .bind(log.status.as_str())
        .bind(&log.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn complete_run_log(&self, log: &ScraperRunLog) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scraper_runs
            SET end_time = $2,
                duration_seconds = $3,
                status = $4,
                grants_found = $5,
                grants_added = $6,
                grants_updated = $7,
                error_message = $8,
                metadata = $9
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(log.id)
        .bind(log.end_time)
        .bind(log.duration_seconds)
        .bind(log.status.as_str())
        .bind(log.grants_found as i32)
        .bind(log.grants_added as i32)
        .bind(log.grants_updated as i32)
        .bind(&log.error_message)
        .bind(&log.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!(
                "Run log {} is unknown or already completed",
                log.id
            )));
        }
        Ok(())
    }
}
