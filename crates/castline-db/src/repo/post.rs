//! Post repository.
//!
//! Posts belong to the wider application. This repository only touches the
//! publish-tracking columns, and every write after a claim is filtered on the
//! claim token (`last_publish_job_id`) so a stale writer can never clobber a
//! newer attempt.

use async_trait::async_trait;
use castline_core::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// How strictly a claim checks the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Sweeper claims: the post must be due.
    Due,
    /// Publish-now claims: skip the due check and move `scheduled_for` to now.
    Immediate,
}

/// A post the sweeper found eligible. Only the light columns are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DueCandidate {
    pub id: String,
    pub user_id: String,
    pub scheduled_for: DateTime<Utc>,
}

/// Heavy fields, loaded only after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClaimedPost {
    pub content: Option<String>,
    pub providers: Vec<String>,
    pub media: Vec<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Enough of a post to explain why a claim did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostPublishState {
    pub status: String,
    pub published_at: Option<DateTime<Utc>>,
    pub last_publish_job_id: Option<String>,
}

/// The post currently holding a job's claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LinkedPost {
    pub id: String,
    pub status: String,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Diagnostics for idle sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::FromRow)]
pub struct DueStats {
    /// Eligible posts that are due now and unclaimed.
    pub due: i64,
    /// Earliest eligible `scheduled_for` still in the future.
    pub next_scheduled_for: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Eligible, due posts ordered by `scheduled_for, user_id, id`.
    async fn find_due(&self, limit: i64) -> DbResult<Vec<DueCandidate>>;
    async fn due_stats(&self) -> DbResult<DueStats>;

    /// Atomically take ownership of a post. `Ok(true)` iff exactly one row changed.
    async fn claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        mode: ClaimMode,
    ) -> DbResult<bool>;
    async fn load_claimed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
    ) -> DbResult<ClaimedPost>;
    /// Terminal failure before a job exists. The claim is kept.
    async fn mark_claim_failed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        code: &str,
    ) -> DbResult<()>;
    /// Undo a claim so the post is eligible again, recording why.
    async fn release_claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        error: &str,
    ) -> DbResult<()>;
    async fn publish_state(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> DbResult<Option<PostPublishState>>;

    async fn linked_post(&self, job_id: &JobId) -> DbResult<Option<LinkedPost>>;
    /// Copy job progress onto the linked post. `error` overwrites only when present.
    async fn mirror_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<()>;
    /// Apply a finished job to the linked post.
    async fn reflect_outcome(
        &self,
        job_id: &JobId,
        status: JobStatus,
        summary: &str,
    ) -> DbResult<()>;
}

/// PostgreSQL implementation of PostRepo.
pub struct PgPostRepo {
    pool: PgPool,
}

impl PgPostRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostRepo for PgPostRepo {
    async fn find_due(&self, limit: i64) -> DbResult<Vec<DueCandidate>> {
        sqlx::query_as::<_, DueCandidate>(
            r#"
            SELECT id, user_id, scheduled_for
              FROM posts
             WHERE status = 'scheduled'
               AND published_at IS NULL
               AND scheduled_for IS NOT NULL
               AND scheduled_for <= NOW()
               AND last_publish_job_id IS NULL
             ORDER BY scheduled_for ASC, user_id, id
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from_sqlx)
    }

    async fn due_stats(&self) -> DbResult<DueStats> {
        sqlx::query_as::<_, DueStats>(
            r#"
            SELECT COUNT(*) FILTER (WHERE scheduled_for <= NOW()) AS due,
                   MIN(scheduled_for) FILTER (WHERE scheduled_for > NOW()) AS next_scheduled_for
              FROM posts
             WHERE status = 'scheduled'
               AND published_at IS NULL
               AND scheduled_for IS NOT NULL
               AND last_publish_job_id IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from_sqlx)
    }

    async fn claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        mode: ClaimMode,
    ) -> DbResult<bool> {
        let sql = match mode {
            ClaimMode::Due => {
                r#"
                UPDATE posts
                   SET last_publish_job_id = $3,
                       last_publish_status = 'queued',
                       last_publish_error = NULL,
                       last_publish_attempt_at = NOW(),
                       updated_at = NOW()
                 WHERE id = $1
                   AND user_id = $2
                   AND status = 'scheduled'
                   AND published_at IS NULL
                   AND scheduled_for IS NOT NULL
                   AND scheduled_for <= NOW()
                   AND last_publish_job_id IS NULL
                "#
            }
            ClaimMode::Immediate => {
                r#"
                UPDATE posts
                   SET scheduled_for = NOW(),
                       last_publish_job_id = $3,
                       last_publish_status = 'queued',
                       last_publish_error = NULL,
                       last_publish_attempt_at = NOW(),
                       updated_at = NOW()
                 WHERE id = $1
                   AND user_id = $2
                   AND status = 'scheduled'
                   AND published_at IS NULL
                   AND last_publish_job_id IS NULL
                "#
            }
        };
        let result = sqlx::query(sql)
            .bind(post_id)
            .bind(user_id)
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_claimed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
    ) -> DbResult<ClaimedPost> {
        sqlx::query_as::<_, ClaimedPost>(
            r#"
            SELECT content,
                   COALESCE(providers, ARRAY[]::TEXT[]) AS providers,
                   COALESCE(media, ARRAY[]::TEXT[]) AS media,
                   scheduled_for
              FROM posts
             WHERE id = $1 AND user_id = $2 AND last_publish_job_id = $3
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from_sqlx)?
        .ok_or_else(|| DbError::NotFound(format!("post {post_id} claimed by {job_id}")))
    }

    async fn mark_claim_failed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        code: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE posts
               SET last_publish_status = 'failed',
                   last_publish_error = $4,
                   updated_at = NOW()
             WHERE id = $1 AND user_id = $2 AND last_publish_job_id = $3
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(job_id.as_str())
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        error: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE posts
               SET last_publish_job_id = NULL,
                   last_publish_status = NULL,
                   last_publish_error = $4,
                   last_publish_attempt_at = NULL,
                   updated_at = NOW()
             WHERE id = $1 AND user_id = $2 AND last_publish_job_id = $3
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(job_id.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish_state(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> DbResult<Option<PostPublishState>> {
        let state = sqlx::query_as::<_, PostPublishState>(
            r#"
            SELECT status, published_at, last_publish_job_id
              FROM posts
             WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn linked_post(&self, job_id: &JobId) -> DbResult<Option<LinkedPost>> {
        let post = sqlx::query_as::<_, LinkedPost>(
            "SELECT id, status, scheduled_for FROM posts WHERE last_publish_job_id = $1 LIMIT 1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }

    async fn mirror_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE posts
               SET last_publish_status = $2,
                   last_publish_error = COALESCE($3, last_publish_error),
                   updated_at = NOW()
             WHERE last_publish_job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reflect_outcome(
        &self,
        job_id: &JobId,
        status: JobStatus,
        summary: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE posts
               SET last_publish_status = $2,
                   last_publish_error = CASE WHEN $2 = 'failed' THEN $3 ELSE NULL END,
                   status = CASE WHEN $2 = 'completed' THEN 'published' ELSE status END,
                   published_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE published_at END,
                   updated_at = NOW()
             WHERE last_publish_job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .bind(status.as_str())
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
