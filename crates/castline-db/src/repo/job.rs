//! Publish job repository.

use async_trait::async_trait;
use castline_core::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A job about to be inserted in `queued` state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPublishJob {
    pub id: JobId,
    pub user_id: String,
    pub providers: Vec<String>,
    pub caption: String,
    /// Snapshot of what was requested, kept for audit.
    pub request: serde_json::Value,
}

/// A publish job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PublishJobRecord {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub providers: Vec<String>,
    pub caption: String,
    pub request_json: serde_json::Value,
    pub result_json: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PublishJobRecord {
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

#[async_trait]
pub trait PublishJobRepo: Send + Sync {
    async fn insert(&self, job: &NewPublishJob) -> DbResult<()>;
    async fn get(&self, id: &str) -> DbResult<PublishJobRecord>;
    async fn mark_running(&self, id: &JobId) -> DbResult<()>;
    /// Record the final state. `error` only overwrites when present.
    async fn finish(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DbResult<()>;
    /// Round-trip to the store, for readiness checks.
    async fn ping(&self) -> DbResult<()>;
}

/// PostgreSQL implementation of PublishJobRepo.
pub struct PgPublishJobRepo {
    pool: PgPool,
}

impl PgPublishJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PublishJobRepo for PgPublishJobRepo {
    async fn insert(&self, job: &NewPublishJob) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_jobs (id, user_id, status, providers, caption, request_json, created_at, updated_at)
            VALUES ($1, $2, 'queued', $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.user_id)
        .bind(&job.providers)
        .bind(&job.caption)
        .bind(&job.request)
        .execute(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DbResult<PublishJobRecord> {
        let record =
            sqlx::query_as::<_, PublishJobRecord>("SELECT * FROM publish_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("publish job {}", id)))?;
        Ok(record)
    }

    async fn mark_running(&self, id: &JobId) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE publish_jobs
               SET status = 'running', started_at = NOW(), updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE publish_jobs
               SET status = $2,
                   result_json = COALESCE($3, result_json),
                   error = COALESCE($4, error),
                   finished_at = NOW(),
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
