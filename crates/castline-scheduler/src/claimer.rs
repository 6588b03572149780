//! Post claim protocol.
//!
//! A post is owned by at most one job: the claim is a single conditional update
//! that writes the job ID onto the post only while the post is eligible. Only
//! the winner reads the heavy fields, validates them and inserts the job row.

use castline_core::post::validate_claimed;
use castline_core::provider::normalize_providers;
use castline_core::{JobId, JobStatus, Provider, RealtimeEvent, ValidationFailure, truncate};
use castline_db::{ClaimMode, DbResult, NewPublishJob, PostRepo, PublishJobRepo};
use chrono::SecondsFormat;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::{ClaimError, RealtimeHub};

/// Max length of the insert error stored on a released post.
const RELEASE_ERROR_MAX: usize = 300;

/// What started a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSource {
    ScheduledPost,
    PublishNow,
    Adhoc,
}

impl PublishSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSource::ScheduledPost => "scheduled_post",
            PublishSource::PublishNow => "manual_publish_now",
            PublishSource::Adhoc => "publish_async",
        }
    }
}

impl From<ClaimMode> for PublishSource {
    fn from(mode: ClaimMode) -> Self {
        match mode {
            ClaimMode::Due => PublishSource::ScheduledPost,
            ClaimMode::Immediate => PublishSource::PublishNow,
        }
    }
}

/// A queued job, ready for the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishTask {
    pub job_id: JobId,
    pub user_id: String,
    pub post_id: Option<String>,
    pub caption: String,
    pub providers: Vec<String>,
    /// Server-local media paths, in post order.
    pub media: Vec<String>,
    pub origin: Url,
    pub dry_run: bool,
}

/// Result of one claim-and-enqueue attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A job row exists and the task can be handed to the runner.
    Enqueued(PublishTask),
    /// Another claimer won, or the post is no longer eligible.
    NotClaimed,
    /// Claimed but invalid. The post is marked failed and keeps the claim.
    Rejected(ValidationFailure),
}

/// A publish request that is not tied to a stored post.
#[derive(Debug, Clone, Default)]
pub struct AdhocRequest {
    pub caption: String,
    pub providers: Vec<String>,
    pub media: Vec<String>,
    pub dry_run: bool,
}

pub struct PostClaimer {
    posts: Arc<dyn PostRepo>,
    jobs: Arc<dyn PublishJobRepo>,
    hub: Arc<RealtimeHub>,
    origin: Url,
}

impl PostClaimer {
    pub fn new(
        posts: Arc<dyn PostRepo>,
        jobs: Arc<dyn PublishJobRepo>,
        hub: Arc<RealtimeHub>,
        origin: Url,
    ) -> Self {
        Self {
            posts,
            jobs,
            hub,
            origin,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Try to take ownership of a post for `job_id`.
    pub async fn claim(
        &self,
        post_id: &str,
        user_id: &str,
        job_id: &JobId,
        mode: ClaimMode,
    ) -> DbResult<bool> {
        self.posts.claim(post_id, user_id, job_id, mode).await
    }

    /// Claim a post, validate it and insert its queued job.
    pub async fn claim_and_enqueue(
        &self,
        post_id: &str,
        user_id: &str,
        mode: ClaimMode,
    ) -> Result<ClaimOutcome, ClaimError> {
        let job_id = JobId::generate();
        if !self
            .claim(post_id, user_id, &job_id, mode)
            .await
            .map_err(ClaimError::Claim)?
        {
            return Ok(ClaimOutcome::NotClaimed);
        }

        let claimed = match self.posts.load_claimed(post_id, user_id, &job_id).await {
            Ok(claimed) => claimed,
            Err(source) => {
                let code = if source.is_resource_exhausted() {
                    "db_out_of_memory"
                } else {
                    "load_failed"
                };
                warn!(post_id, user_id, job_id = %job_id, error = %source, code, "Failed to load claimed post");
                if let Err(e) = self
                    .posts
                    .mark_claim_failed(post_id, user_id, &job_id, code)
                    .await
                {
                    warn!(post_id, job_id = %job_id, error = %e, "Failed to mark post");
                }
                return Err(ClaimError::Load { code, source });
            }
        };

        let caption = match validate_claimed(
            claimed.content.as_deref(),
            &claimed.providers,
            &claimed.media,
        ) {
            Ok(caption) => caption,
            Err(failure) => {
                if let Err(e) = self
                    .posts
                    .mark_claim_failed(post_id, user_id, &job_id, failure.code())
                    .await
                {
                    warn!(post_id, job_id = %job_id, error = %e, "Failed to mark post");
                }
                info!(post_id, user_id, job_id = %job_id, reason = failure.code(), "Skipped post");
                return Ok(ClaimOutcome::Rejected(failure));
            }
        };

        let source = PublishSource::from(mode);
        let request = json!({
            "source": source.as_str(),
            "postId": post_id,
            "userId": user_id,
            "providers": &claimed.providers,
            "media": &claimed.media,
            "scheduledFor": claimed
                .scheduled_for
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "publicOrigin": self.origin.as_str(),
        });
        let job = NewPublishJob {
            id: job_id.clone(),
            user_id: user_id.to_string(),
            providers: claimed.providers.clone(),
            caption: caption.clone(),
            request,
        };

        if let Err(e) = self.jobs.insert(&job).await {
            let message = e.to_string();
            warn!(post_id, user_id, job_id = %job_id, error = %message, "Job insert failed; releasing claim");
            if let Err(release) = self
                .posts
                .release_claim(post_id, user_id, &job_id, truncate(&message, RELEASE_ERROR_MAX))
                .await
            {
                warn!(post_id, job_id = %job_id, error = %release, "Failed to release claim");
            }
            return Err(ClaimError::Insert(e));
        }

        info!(
            post_id,
            user_id,
            job_id = %job_id,
            source = source.as_str(),
            providers = ?claimed.providers,
            media = claimed.media.len(),
            "Enqueued publish job"
        );
        self.hub.emit(RealtimeEvent::job_transition(
            user_id,
            &job_id,
            Some(post_id),
            JobStatus::Queued,
        ));

        Ok(ClaimOutcome::Enqueued(PublishTask {
            job_id,
            user_id: user_id.to_string(),
            post_id: Some(post_id.to_string()),
            caption,
            providers: claimed.providers,
            media: claimed.media,
            origin: self.origin.clone(),
            dry_run: false,
        }))
    }

    /// Insert a queued job for a request that has no backing post.
    ///
    /// An empty provider list means every supported provider.
    pub async fn enqueue_adhoc(
        &self,
        user_id: &str,
        request: AdhocRequest,
    ) -> Result<PublishTask, ClaimError> {
        let mut providers = normalize_providers(&request.providers);
        if providers.is_empty() {
            providers = Provider::ALL.iter().map(|p| p.as_str().to_string()).collect();
        }

        let job_id = JobId::generate();
        let snapshot = json!({
            "source": PublishSource::Adhoc.as_str(),
            "caption": &request.caption,
            "providers": &providers,
            "dryRun": request.dry_run,
            "media": &request.media,
            "publicOrigin": self.origin.as_str(),
        });
        self.jobs
            .insert(&NewPublishJob {
                id: job_id.clone(),
                user_id: user_id.to_string(),
                providers: providers.clone(),
                caption: request.caption.clone(),
                request: snapshot,
            })
            .await
            .map_err(ClaimError::Insert)?;

        info!(
            user_id,
            job_id = %job_id,
            providers = ?providers,
            media = request.media.len(),
            dry_run = request.dry_run,
            "Enqueued publish job"
        );
        self.hub.emit(RealtimeEvent::job_transition(
            user_id,
            &job_id,
            None,
            JobStatus::Queued,
        ));

        Ok(PublishTask {
            job_id,
            user_id: user_id.to_string(),
            post_id: None,
            caption: request.caption,
            providers,
            media: request.media,
            origin: self.origin.clone(),
            dry_run: request.dry_run,
        })
    }
}
