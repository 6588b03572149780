//! Core domain types and traits for the Castline publish pipeline.
//!
//! This crate contains:
//! - Job identifiers (the claim token written onto posts)
//! - Post and publish-job status types plus post-claim validation
//! - Media references and per-provider media selection
//! - The provider adapter trait
//! - Realtime event payloads

pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod media;
pub mod post;
pub mod provider;

pub use error::{Error, Result};
pub use event::RealtimeEvent;
pub use id::JobId;
pub use job::{JobStatus, ProviderResult};
pub use media::{MediaKind, MediaRef};
pub use post::{PostStatus, ValidationFailure};
pub use provider::{Provider, ProviderAdapter, ProviderFailure, PublishRequest, Published};

/// Truncate a string to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
