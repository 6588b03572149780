//! Repository traits and implementations.

pub mod job;
pub mod post;

pub use job::{NewPublishJob, PgPublishJobRepo, PublishJobRecord, PublishJobRepo};
pub use post::{
    ClaimMode, ClaimedPost, DueCandidate, DueStats, LinkedPost, PgPostRepo, PostPublishState,
    PostRepo,
};
