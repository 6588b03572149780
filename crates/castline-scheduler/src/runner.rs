//! Publish job execution.
//!
//! A job moves queued -> running -> completed|failed exactly once. Providers are
//! dispatched concurrently and independently; the job succeeds only when every
//! provider does. A panic anywhere in dispatch fails the job instead of the task.

use castline_core::job::PROVIDERS_FAILED;
use castline_core::provider::{NOT_SUPPORTED, normalize_providers};
use castline_core::{
    JobId, JobStatus, MediaRef, Provider, ProviderResult, PublishRequest, RealtimeEvent, truncate,
};
use castline_db::{PostRepo, PublishJobRepo};
use castline_providers::ProviderRegistry;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use url::Url;

use crate::{PublishTask, RealtimeHub};

/// Result code for a known provider with no adapter configured.
pub const NOT_CONFIGURED: &str = "not_configured";

const POST_ERROR_MAX: usize = 400;
const FAILURE_LOG_MAX: usize = 160;

/// Final state of one job run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub post_id: Option<String>,
    pub status: JobStatus,
    pub results: BTreeMap<String, ProviderResult>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Executes publish jobs on background tasks under an admission limit.
pub struct JobRunner {
    jobs: Arc<dyn PublishJobRepo>,
    posts: Arc<dyn PostRepo>,
    registry: ProviderRegistry,
    hub: Arc<RealtimeHub>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn PublishJobRepo>,
        posts: Arc<dyn PostRepo>,
        registry: ProviderRegistry,
        hub: Arc<RealtimeHub>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            jobs,
            posts,
            registry,
            hub,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Permits not currently held by running jobs.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on its own task once a permit is free. Returns immediately.
    pub fn spawn(self: &Arc<Self>, task: PublishTask) -> JoinHandle<JobOutcome> {
        let runner = self.clone();
        tokio::spawn(async move {
            // The semaphore is never closed, so this only waits.
            let _permit = runner.permits.clone().acquire_owned().await.ok();
            runner.run(task).await
        })
    }

    /// Execute a queued job to completion.
    pub async fn run(&self, task: PublishTask) -> JobOutcome {
        let start = Instant::now();
        let post_id = match self.posts.linked_post(&task.job_id).await {
            Ok(linked) => linked.map(|p| p.id).or_else(|| task.post_id.clone()),
            Err(e) => {
                warn!(job_id = %task.job_id, error = %e, "Failed to look up linked post");
                task.post_id.clone()
            }
        };

        info!(
            job_id = %task.job_id,
            user_id = %task.user_id,
            post_id = post_id.as_deref().unwrap_or(""),
            providers = ?task.providers,
            media = task.media.len(),
            dry_run = task.dry_run,
            origin = %task.origin,
            "Publish job started"
        );

        if let Err(e) = self.jobs.mark_running(&task.job_id).await {
            warn!(job_id = %task.job_id, error = %e, "Failed to mark job running");
        }
        if let Err(e) = self
            .posts
            .mirror_job_status(&task.job_id, JobStatus::Running, None)
            .await
        {
            warn!(job_id = %task.job_id, error = %e, "Failed to mirror running status");
        }
        self.notify(&task, post_id.as_deref(), JobStatus::Running);

        let dispatched = AssertUnwindSafe(self.dispatch(&task)).catch_unwind().await;
        let results = match dispatched {
            Ok(results) => results,
            Err(panic_info) => {
                let message = format!("panic: {}", extract_panic_message(&panic_info));
                error!(job_id = %task.job_id, user_id = %task.user_id, panic = %message, "Publish job panicked");
                return self.fail_after_panic(&task, post_id, message).await;
            }
        };

        let overall_ok = results.values().all(|r| r.ok);
        let status = if overall_ok {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        let error = (!overall_ok).then(|| PROVIDERS_FAILED.to_string());
        let result_json = json!({
            "ok": overall_ok,
            "jobId": task.job_id,
            "userId": task.user_id,
            "durationMs": u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "results": &results,
        });

        if let Err(e) = self
            .jobs
            .finish(&task.job_id, status, Some(&result_json), error.as_deref())
            .await
        {
            warn!(job_id = %task.job_id, error = %e, "Failed to persist job result");
        }
        let summary = error.as_deref().unwrap_or_default();
        if let Err(e) = self.posts.reflect_outcome(&task.job_id, status, summary).await {
            warn!(job_id = %task.job_id, error = %e, "Failed to reflect job onto post");
        }

        let failures = failure_summary(&results);
        info!(
            job_id = %task.job_id,
            user_id = %task.user_id,
            post_id = post_id.as_deref().unwrap_or(""),
            status = %status,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            failures = ?failures,
            "Publish job finished"
        );
        self.notify(&task, post_id.as_deref(), status);

        JobOutcome {
            job_id: task.job_id,
            post_id,
            status,
            results,
            error,
        }
    }

    async fn fail_after_panic(
        &self,
        task: &PublishTask,
        post_id: Option<String>,
        message: String,
    ) -> JobOutcome {
        if let Err(e) = self
            .jobs
            .finish(&task.job_id, JobStatus::Failed, None, Some(&message))
            .await
        {
            warn!(job_id = %task.job_id, error = %e, "Failed to persist panic");
        }
        if let Err(e) = self
            .posts
            .mirror_job_status(
                &task.job_id,
                JobStatus::Failed,
                Some(truncate(&message, POST_ERROR_MAX)),
            )
            .await
        {
            warn!(job_id = %task.job_id, error = %e, "Failed to mirror panic onto post");
        }
        self.notify(task, post_id.as_deref(), JobStatus::Failed);

        JobOutcome {
            job_id: task.job_id.clone(),
            post_id,
            status: JobStatus::Failed,
            results: BTreeMap::new(),
            error: Some(message),
        }
    }

    async fn dispatch(&self, task: &PublishTask) -> BTreeMap<String, ProviderResult> {
        let media: Vec<MediaRef> = task
            .media
            .iter()
            .map(|path| MediaRef::new(path.as_str(), public_url(&task.origin, path)))
            .collect();
        let providers = normalize_providers(&task.providers);

        let calls = providers
            .iter()
            .map(|name| self.publish_one(name, task, &media));
        let results = join_all(calls).await;
        providers.into_iter().zip(results).collect()
    }

    async fn publish_one(&self, name: &str, task: &PublishTask, media: &[MediaRef]) -> ProviderResult {
        let Ok(provider) = name.parse::<Provider>() else {
            return ProviderResult::failed(NOT_SUPPORTED);
        };
        let selected = match provider.select_media(media) {
            Ok(selected) => selected,
            Err(code) => {
                let received: Vec<&str> = media.iter().map(|m| m.path.as_str()).collect();
                let mut details = serde_json::Map::new();
                details.insert("media".to_string(), json!(received));
                return ProviderResult::failed(code).with_details(details);
            }
        };
        let Some(adapter) = self.registry.get(provider) else {
            return ProviderResult::failed(NOT_CONFIGURED);
        };

        let request = PublishRequest {
            user_id: &task.user_id,
            caption: &task.caption,
            media: &selected,
            dry_run: task.dry_run,
        };
        match adapter.publish(provider, request).await {
            Ok(published) => ProviderResult::succeeded(published.posted, published.details),
            Err(failure) => ProviderResult {
                ok: false,
                posted: failure.posted,
                error: Some(failure.error),
                details: failure.details,
            },
        }
    }

    fn notify(&self, task: &PublishTask, post_id: Option<&str>, status: JobStatus) {
        self.hub.emit(RealtimeEvent::job_transition(
            &task.user_id,
            &task.job_id,
            post_id,
            status,
        ));
    }
}

/// Public URL for a stored media path, for providers that fetch media themselves.
fn public_url(origin: &Url, path: &str) -> Option<String> {
    origin.join(path).ok().map(String::from)
}

/// `provider:error` per failed provider, without details.
fn failure_summary(results: &BTreeMap<String, ProviderResult>) -> Vec<String> {
    results
        .iter()
        .filter(|(_, r)| !r.ok)
        .map(|(provider, r)| {
            let message = r.error.as_deref().filter(|e| !e.trim().is_empty()).unwrap_or("failed");
            format!("{provider}:{}", truncate(message, FAILURE_LOG_MAX))
        })
        .collect()
}

fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
