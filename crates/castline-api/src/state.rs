//! Application state.

use castline_config::{CastlineConfig, RealtimeConfig};
use castline_db::{PostRepo, PublishJobRepo};
use castline_providers::ProviderRegistry;
use castline_scheduler::{JobRunner, PostClaimer, RealtimeHub};
use std::sync::Arc;
use url::Url;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub posts: Arc<dyn PostRepo>,
    pub jobs: Arc<dyn PublishJobRepo>,
    pub hub: Arc<RealtimeHub>,
    pub claimer: Arc<PostClaimer>,
    pub runner: Arc<JobRunner>,
    pub realtime: RealtimeConfig,
}

impl AppState {
    pub fn new(
        posts: Arc<dyn PostRepo>,
        jobs: Arc<dyn PublishJobRepo>,
        registry: ProviderRegistry,
        config: &CastlineConfig,
        origin: Url,
    ) -> Self {
        let hub = Arc::new(RealtimeHub::new());
        let claimer = Arc::new(PostClaimer::new(
            posts.clone(),
            jobs.clone(),
            hub.clone(),
            origin,
        ));
        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            posts.clone(),
            registry,
            hub.clone(),
            config.runner.max_concurrent_jobs,
        ));

        Self {
            posts,
            jobs,
            hub,
            claimer,
            runner,
            realtime: config.realtime.clone(),
        }
    }
}
