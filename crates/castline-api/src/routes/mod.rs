//! API routes.

pub mod health;
pub mod posts;
pub mod publish;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;
use castline_core::{JobId, JobStatus};
use serde::Serialize;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/social", publish::router())
        .nest("/posts", posts::router())
        .route("/events/ws", get(ws_handler))
}

/// Body returned when a job has been queued.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    ok: bool,
    job_id: String,
    status: &'static str,
}

impl QueuedResponse {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            ok: true,
            job_id: job_id.to_string(),
            status: JobStatus::Queued.as_str(),
        }
    }
}
