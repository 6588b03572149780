//! Post lifecycle types and post-claim validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::provider::Provider;

/// Lifecycle status of a post. Only `Scheduled` posts are eligible for claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown post status: {other}"
            ))),
        }
    }
}

/// Terminal reasons a claimed post is not turned into a job.
///
/// The claim is kept when one of these is recorded, so the post is never
/// retried automatically; the owner has to edit it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("empty_content")]
    EmptyContent,
    #[error("missing_providers")]
    MissingProviders,
    #[error("missing_media")]
    MissingMedia,
}

impl ValidationFailure {
    /// Stable error code stored in `last_publish_error`.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationFailure::EmptyContent => "empty_content",
            ValidationFailure::MissingProviders => "missing_providers",
            ValidationFailure::MissingMedia => "missing_media",
        }
    }
}

/// Validate the heavy fields of a freshly claimed post.
///
/// Returns the trimmed caption on success.
pub fn validate_claimed(
    content: Option<&str>,
    providers: &[String],
    media: &[String],
) -> Result<String, ValidationFailure> {
    let caption = content.map(str::trim).unwrap_or_default();
    if caption.is_empty() {
        return Err(ValidationFailure::EmptyContent);
    }
    if providers.is_empty() {
        return Err(ValidationFailure::MissingProviders);
    }
    if media.is_empty() {
        let requires_media = providers
            .iter()
            .filter_map(|p| p.parse::<Provider>().ok())
            .any(|p| p.requires_media());
        if requires_media {
            return Err(ValidationFailure::MissingMedia);
        }
    }
    Ok(caption.to_string())
}
