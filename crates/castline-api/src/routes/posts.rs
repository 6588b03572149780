//! Publish-now for stored posts.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use castline_core::PostStatus;
use castline_db::{ClaimMode, PostPublishState};
use castline_scheduler::ClaimOutcome;
use tracing::{info, warn};

use super::QueuedResponse;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/{post_id}/publish-now/user/{user_id}", post(publish_now))
}

async fn publish_now(
    State(state): State<AppState>,
    Path((post_id, user_id)): Path<(String, String)>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let (post_id, user_id) = (post_id.trim(), user_id.trim());
    if post_id.is_empty() || user_id.is_empty() {
        return Err(ApiError::BadRequest("userId and postId are required".into()));
    }
    info!(post_id, user_id, "Publish-now requested");

    match state
        .claimer
        .claim_and_enqueue(post_id, user_id, ClaimMode::Immediate)
        .await?
    {
        ClaimOutcome::Enqueued(task) => {
            let response = QueuedResponse::new(&task.job_id);
            state.runner.spawn(task);
            Ok(Json(response))
        }
        ClaimOutcome::Rejected(failure) => Err(ApiError::BadRequest(failure.code().into())),
        ClaimOutcome::NotClaimed => Err(explain_not_claimed(&state, post_id, user_id).await),
    }
}

/// Work out why an immediate claim matched no row.
async fn explain_not_claimed(state: &AppState, post_id: &str, user_id: &str) -> ApiError {
    match state.posts.publish_state(post_id, user_id).await {
        Ok(None) => ApiError::NotFound("not found".into()),
        Ok(Some(post)) => not_claimed_reason(&post),
        Err(e) => {
            warn!(post_id, user_id, error = %e, "Failed to read post after lost claim");
            ApiError::Conflict("not_publishable".into())
        }
    }
}

fn not_claimed_reason(post: &PostPublishState) -> ApiError {
    if post.published_at.is_some() {
        return ApiError::Conflict("already_published".into());
    }
    if post
        .last_publish_job_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty())
    {
        return ApiError::Conflict("already_queued".into());
    }
    if post.status.trim() != PostStatus::Scheduled.as_str() {
        return ApiError::BadRequest("not_scheduled".into());
    }
    ApiError::Conflict("not_publishable".into())
}
