//! In-memory store.
//!
//! Implements [`PostRepo`] and [`PublishJobRepo`] over a single mutex so every
//! operation is atomic, mirroring the row-level guarantees of the conditional
//! updates in the PostgreSQL repositories. Used by tests and local demos.
//! Fault hooks let callers simulate insert failures and resource exhaustion.

use async_trait::async_trait;
use castline_core::{JobId, JobStatus, PostStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::repo::{
    ClaimMode, ClaimedPost, DueCandidate, DueStats, LinkedPost, NewPublishJob, PostPublishState,
    PostRepo, PublishJobRecord, PublishJobRepo,
};
use crate::{DbError, DbResult};

/// A full post row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub content: Option<String>,
    pub providers: Vec<String>,
    pub media: Vec<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_publish_job_id: Option<String>,
    pub last_publish_status: Option<String>,
    pub last_publish_error: Option<String>,
    pub last_publish_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PostRow {
    /// A scheduled, unclaimed post.
    pub fn scheduled(
        id: &str,
        user_id: &str,
        content: &str,
        providers: &[&str],
        media: &[&str],
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            status: PostStatus::Scheduled.as_str().to_string(),
            content: Some(content.to_string()),
            providers: providers.iter().map(|s| s.to_string()).collect(),
            media: media.iter().map(|s| s.to_string()).collect(),
            scheduled_for: Some(scheduled_for),
            published_at: None,
            last_publish_job_id: None,
            last_publish_status: None,
            last_publish_error: None,
            last_publish_attempt_at: None,
            updated_at: Utc::now(),
        }
    }

    fn is_claimable(&self, mode: ClaimMode, now: DateTime<Utc>) -> bool {
        let base = self.status == PostStatus::Scheduled.as_str()
            && self.published_at.is_none()
            && self.last_publish_job_id.is_none();
        match mode {
            ClaimMode::Due => base && self.scheduled_for.is_some_and(|at| at <= now),
            ClaimMode::Immediate => base,
        }
    }

    fn holds(&self, job_id: &JobId) -> bool {
        self.last_publish_job_id.as_deref() == Some(job_id.as_str())
    }
}

#[derive(Debug, Default)]
struct State {
    posts: HashMap<String, PostRow>,
    jobs: HashMap<String, PublishJobRecord>,
    failing_inserts: u32,
    exhausted_discoveries: u32,
    failing_loads: u32,
    discovery_limits: Vec<i64>,
}

/// Mutex-backed store with conditional-update semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied row change,
        // so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_post(&self, post: PostRow) {
        self.lock().posts.insert(post.id.clone(), post);
    }

    pub fn post(&self, id: &str) -> Option<PostRow> {
        self.lock().posts.get(id).cloned()
    }

    pub fn job(&self, id: &str) -> Option<PublishJobRecord> {
        self.lock().jobs.get(id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Make the next `n` job inserts fail.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_job_inserts(&self, n: u32) {
        self.lock().failing_inserts = n;
    }

    /// Make the next `n` discovery queries report resource exhaustion.
    #[cfg(any(test, feature = "test-util"))]
    pub fn exhaust_next_discoveries(&self, n: u32) {
        self.lock().exhausted_discoveries = n;
    }

    /// Make the next `n` post-claim loads report resource exhaustion.
    #[cfg(any(test, feature = "test-util"))]
    pub fn exhaust_next_loads(&self, n: u32) {
        self.lock().failing_loads = n;
    }

    /// Limits passed to every discovery query so far.
    #[cfg(any(test, feature = "test-util"))]
    pub fn discovery_limits(&self) -> Vec<i64> {
        self.lock().discovery_limits.clone()
    }

    fn with_linked_post<F>(&self, job_id: &JobId, f: F)
    where
        F: FnOnce(&mut PostRow),
    {
        let mut state = self.lock();
        if let Some(post) = state.posts.values_mut().find(|p| p.holds(job_id)) {
            f(post);
            post.updated_at = Utc::now();
        }
    }
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl PostRepo for MemoryStore {
    async fn find_due(&self, limit: i64) -> DbResult<Vec<DueCandidate>> {
        let mut state = self.lock();
        state.discovery_limits.push(limit);
        if take_fault(&mut state.exhausted_discoveries) {
            return Err(DbError::ResourceExhausted("out of memory".to_string()));
        }

        let now = Utc::now();
        let mut due: Vec<DueCandidate> = state
            .posts
            .values()
            .filter(|p| p.is_claimable(ClaimMode::Due, now))
            .filter_map(|p| {
                Some(DueCandidate {
                    id: p.id.clone(),
                    user_id: p.user_id.clone(),
                    scheduled_for: p.scheduled_for?,
                })
            })
            .collect();
        due.sort_by(|a, b| {
            (a.scheduled_for, &a.user_id, &a.id).cmp(&(b.scheduled_for, &b.user_id, &b.id))
        });
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn due_stats(&self) -> DbResult<DueStats> {
        let state = self.lock();
        let now = Utc::now();
        let mut stats = DueStats::default();
        for post in state.posts.values() {
            if !post.is_claimable(ClaimMode::Immediate, now) {
                continue;
            }
            match post.scheduled_for {
                Some(at) if at <= now => stats.due += 1,
                Some(at) => {
                    stats.next_scheduled_for =
                        Some(stats.next_scheduled_for.map_or(at, |next| next.min(at)));
                }
                None => {}
            }
        }
        Ok(stats)
    }

    async fn claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        mode: ClaimMode,
    ) -> DbResult<bool> {
        let mut state = self.lock();
        let now = Utc::now();
        let Some(post) = state
            .posts
            .get_mut(post_id)
            .filter(|p| p.user_id == user_id && p.is_claimable(mode, now))
        else {
            return Ok(false);
        };

        if mode == ClaimMode::Immediate {
            post.scheduled_for = Some(now);
        }
        post.last_publish_job_id = Some(job_id.to_string());
        post.last_publish_status = Some(JobStatus::Queued.as_str().to_string());
        post.last_publish_error = None;
        post.last_publish_attempt_at = Some(now);
        post.updated_at = now;
        Ok(true)
    }

    async fn load_claimed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
    ) -> DbResult<ClaimedPost> {
        let mut state = self.lock();
        if take_fault(&mut state.failing_loads) {
            return Err(DbError::ResourceExhausted("out of memory".to_string()));
        }
        state
            .posts
            .get(post_id)
            .filter(|p| p.user_id == user_id && p.holds(job_id))
            .map(|p| ClaimedPost {
                content: p.content.clone(),
                providers: p.providers.clone(),
                media: p.media.clone(),
                scheduled_for: p.scheduled_for,
            })
            .ok_or_else(|| DbError::NotFound(format!("post {post_id} claimed by {job_id}")))
    }

    async fn mark_claim_failed(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        code: &str,
    ) -> DbResult<()> {
        let mut state = self.lock();
        if let Some(post) = state
            .posts
            .get_mut(post_id)
            .filter(|p| p.user_id == user_id && p.holds(job_id))
        {
            post.last_publish_status = Some(JobStatus::Failed.as_str().to_string());
            post.last_publish_error = Some(code.to_string());
            post.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        error: &str,
    ) -> DbResult<()> {
        let mut state = self.lock();
        if let Some(post) = state
            .posts
            .get_mut(post_id)
            .filter(|p| p.user_id == user_id && p.holds(job_id))
        {
            post.last_publish_job_id = None;
            post.last_publish_status = None;
            post.last_publish_error = Some(error.to_string());
            post.last_publish_attempt_at = None;
            post.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn publish_state(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> DbResult<Option<PostPublishState>> {
        Ok(self
            .lock()
            .posts
            .get(post_id)
            .filter(|p| p.user_id == user_id)
            .map(|p| PostPublishState {
                status: p.status.clone(),
                published_at: p.published_at,
                last_publish_job_id: p.last_publish_job_id.clone(),
            }))
    }

    async fn linked_post(&self, job_id: &JobId) -> DbResult<Option<LinkedPost>> {
        Ok(self
            .lock()
            .posts
            .values()
            .find(|p| p.holds(job_id))
            .map(|p| LinkedPost {
                id: p.id.clone(),
                status: p.status.clone(),
                scheduled_for: p.scheduled_for,
            }))
    }

    async fn mirror_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        self.with_linked_post(job_id, |post| {
            post.last_publish_status = Some(status.as_str().to_string());
            if let Some(error) = error {
                post.last_publish_error = Some(error.to_string());
            }
        });
        Ok(())
    }

    async fn reflect_outcome(
        &self,
        job_id: &JobId,
        status: JobStatus,
        summary: &str,
    ) -> DbResult<()> {
        self.with_linked_post(job_id, |post| {
            post.last_publish_status = Some(status.as_str().to_string());
            post.last_publish_error = match status {
                JobStatus::Failed => Some(summary.to_string()),
                _ => None,
            };
            if status == JobStatus::Completed {
                post.status = PostStatus::Published.as_str().to_string();
                post.published_at = Some(Utc::now());
            }
        });
        Ok(())
    }
}

#[async_trait]
impl PublishJobRepo for MemoryStore {
    async fn insert(&self, job: &NewPublishJob) -> DbResult<()> {
        let mut state = self.lock();
        if take_fault(&mut state.failing_inserts) {
            return Err(DbError::ResourceExhausted(
                "could not extend relation publish_jobs".to_string(),
            ));
        }
        if state.jobs.contains_key(job.id.as_str()) {
            return Err(DbError::Duplicate(format!("publish job {}", job.id)));
        }
        let now = Utc::now();
        state.jobs.insert(
            job.id.to_string(),
            PublishJobRecord {
                id: job.id.to_string(),
                user_id: job.user_id.clone(),
                status: JobStatus::Queued.as_str().to_string(),
                providers: job.providers.clone(),
                caption: job.caption.clone(),
                request_json: job.request.clone(),
                result_json: None,
                error: None,
                created_at: now,
                started_at: None,
                finished_at: None,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> DbResult<PublishJobRecord> {
        self.job(id)
            .ok_or_else(|| DbError::NotFound(format!("publish job {}", id)))
    }

    async fn mark_running(&self, id: &JobId) -> DbResult<()> {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(id.as_str()) {
            let now = Utc::now();
            job.status = JobStatus::Running.as_str().to_string();
            job.started_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> DbResult<()> {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(id.as_str()) {
            let now = Utc::now();
            job.status = status.as_str().to_string();
            if let Some(result) = result {
                job.result_json = Some(result.clone());
            }
            if let Some(error) = error {
                job.error = Some(error.to_string());
            }
            job.finished_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}
