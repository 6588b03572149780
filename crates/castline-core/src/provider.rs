//! Provider adapter trait and per-provider media rules.
//!
//! Adapters publish one caption (plus media) to one social network. They are
//! independently fallible: a failure in one never affects the others.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::media::MediaRef;

/// Result code for providers the pipeline has no publishing support for.
pub const NOT_SUPPORTED: &str = "not_supported_yet";

/// Networks the pipeline knows how to publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Facebook,
    Instagram,
    TikTok,
    YouTube,
    Pinterest,
}

/// Which media a provider consumes from a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaNeed {
    /// Every image; zero images is acceptable.
    AllImages,
    /// Every image; at least one is required.
    SomeImages,
    FirstImage,
    FirstVideo,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Facebook,
        Provider::Instagram,
        Provider::TikTok,
        Provider::YouTube,
        Provider::Pinterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Facebook => "facebook",
            Provider::Instagram => "instagram",
            Provider::TikTok => "tiktok",
            Provider::YouTube => "youtube",
            Provider::Pinterest => "pinterest",
        }
    }

    pub fn media_need(&self) -> MediaNeed {
        match self {
            Provider::Facebook => MediaNeed::AllImages,
            Provider::Instagram => MediaNeed::SomeImages,
            Provider::TikTok | Provider::YouTube => MediaNeed::FirstVideo,
            Provider::Pinterest => MediaNeed::FirstImage,
        }
    }

    /// Image/video-only networks that cannot publish a caption on its own.
    pub fn requires_media(&self) -> bool {
        !matches!(self.media_need(), MediaNeed::AllImages)
    }

    /// Pick the subset of `media` this provider publishes.
    ///
    /// Returns a stable error code when a media-only provider finds nothing usable.
    pub fn select_media(&self, media: &[MediaRef]) -> Result<Vec<MediaRef>, String> {
        let images = || media.iter().filter(|m| m.is_image()).cloned();
        let selected: Vec<MediaRef> = match self.media_need() {
            MediaNeed::AllImages | MediaNeed::SomeImages => images().collect(),
            MediaNeed::FirstImage => images().take(1).collect(),
            MediaNeed::FirstVideo => media.iter().filter(|m| m.is_video()).take(1).cloned().collect(),
        };

        if selected.is_empty() && self.requires_media() {
            let wanted = match self.media_need() {
                MediaNeed::FirstVideo => "video",
                _ => "image",
            };
            return Err(format!("{}_requires_{}", self.as_str(), wanted));
        }
        Ok(selected)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" => Ok(Provider::Facebook),
            "instagram" => Ok(Provider::Instagram),
            "tiktok" => Ok(Provider::TikTok),
            "youtube" => Ok(Provider::YouTube),
            "pinterest" => Ok(Provider::Pinterest),
            other => Err(crate::Error::InvalidInput(format!(
                "unsupported provider: {other}"
            ))),
        }
    }
}

/// Trim, lowercase and de-duplicate requested provider names, keeping first-seen order.
pub fn normalize_providers<I, S>(providers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for p in providers {
        let p = p.as_ref().trim().to_ascii_lowercase();
        if !p.is_empty() && !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

/// A single publish call.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub user_id: &'a str,
    pub caption: &'a str,
    pub media: &'a [MediaRef],
    /// Perform no network or state-mutating calls.
    pub dry_run: bool,
}

/// A successful publish.
#[derive(Debug, Clone, Default)]
pub struct Published {
    pub posted: u32,
    pub details: Map<String, Value>,
}

/// A failed publish. `posted` counts partial successes inside the provider
/// (e.g. some Facebook pages accepted the post before one rejected it).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ProviderFailure {
    pub posted: u32,
    /// Short, user-presentable error code or message.
    pub error: String,
    pub details: Map<String, Value>,
}

impl ProviderFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            posted: 0,
            error: error.into(),
            details: Map::new(),
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }
}

/// Trait for provider publishing backends.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Name of this adapter, for logging.
    fn name(&self) -> &str;

    /// Publish `request` to `provider`.
    async fn publish(
        &self,
        provider: Provider,
        request: PublishRequest<'_>,
    ) -> Result<Published, ProviderFailure>;
}
