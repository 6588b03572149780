//! Ad-hoc publish jobs and job status polling.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use castline_db::{PublishJobRecord, PublishJobRepo};
use castline_scheduler::AdhocRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::QueuedResponse;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/publish-async/user/{user_id}", post(publish_async))
        .route("/publish-jobs/{job_id}", get(get_job))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PublishAsyncRequest {
    caption: String,
    providers: Vec<String>,
    media: Vec<String>,
    dry_run: bool,
}

/// Drop NUL bytes (Postgres rejects them in text) and surrounding whitespace.
fn clean_caption(raw: &str) -> String {
    raw.replace('\0', "").trim().to_string()
}

async fn publish_async(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<PublishAsyncRequest>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("userId is required".into()));
    }
    let caption = clean_caption(&req.caption);
    if caption.is_empty() {
        return Err(ApiError::BadRequest("caption is required".into()));
    }

    let task = state
        .claimer
        .enqueue_adhoc(
            user_id,
            AdhocRequest {
                caption,
                providers: req.providers,
                media: req.media,
                dry_run: req.dry_run,
            },
        )
        .await?;

    let response = QueuedResponse::new(&task.job_id);
    state.runner.spawn(task);
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    ok: bool,
    id: String,
    job_id: String,
    user_id: String,
    status: String,
    providers: Vec<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    result: Value,
}

impl From<PublishJobRecord> for JobResponse {
    fn from(job: PublishJobRecord) -> Self {
        Self {
            ok: true,
            job_id: job.id.clone(),
            id: job.id,
            user_id: job.user_id,
            status: job.status,
            providers: job.providers,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            updated_at: job.updated_at,
            error: job.error.filter(|e| !e.is_empty()),
            result: job.result_json.unwrap_or_else(|| json!({})),
        }
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs.get(job_id.trim()).await?;
    Ok(Json(job.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app, get, post_json, send};
    use axum::http::StatusCode;
    use castline_core::JobId;
    use castline_db::{MemoryStore, NewPublishJob};
    use std::time::Duration;

    async fn wait_for_terminal(store: &MemoryStore, job_id: &str) -> PublishJobRecord {
        for _ in 0..200 {
            if let Some(job) = store.job(job_id) {
                if job.finished_at.is_some() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }

    #[test]
    fn test_clean_caption() {
        assert_eq!(clean_caption("  hi\0 there "), "hi there");
        assert_eq!(clean_caption("\0 \0"), "");
    }

    #[tokio::test]
    async fn test_blank_caption_rejected() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            post_json("/api/social/publish-async/user/u1", json!({ "caption": "   " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "caption is required");
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_async_runs_job() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            post_json(
                "/api/social/publish-async/user/u1",
                json!({
                    "caption": "hello",
                    "providers": ["Facebook", "facebook"],
                    "dryRun": true
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["status"], "queued");
        let job_id = body["jobId"].as_str().unwrap();
        assert!(job_id.starts_with("pub_"));

        let job = wait_for_terminal(&store, job_id).await;
        assert_eq!(job.status, "completed");
        assert_eq!(job.providers, vec!["facebook".to_string()]);
        assert_eq!(job.request_json["source"], "publish_async");
        let result = job.result_json.unwrap();
        assert_eq!(result["results"]["facebook"]["ok"], true);
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let (app, _store) = app();
        let (status, body) = send(app, get("/api/social/publish-jobs/pub_missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_get_queued_job() {
        let (app, store) = app();
        store
            .insert(&NewPublishJob {
                id: JobId::from_string("pub_abc"),
                user_id: "u1".into(),
                providers: vec!["tiktok".into()],
                caption: "hello".into(),
                request: json!({ "source": "publish_async" }),
            })
            .await
            .unwrap();

        let (status, body) = send(app, get("/api/social/publish-jobs/pub_abc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "pub_abc");
        assert_eq!(body["jobId"], "pub_abc");
        assert_eq!(body["userId"], "u1");
        assert_eq!(body["status"], "queued");
        assert_eq!(body["providers"], json!(["tiktok"]));
        assert!(body["startedAt"].is_null());
        assert!(body.get("error").is_none());
        assert_eq!(body["result"], json!({}));
    }
}
